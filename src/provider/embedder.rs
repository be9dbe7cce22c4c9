// src/provider/embedder.rs — Offline feature-hashing embedder

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingService;
use crate::infra::errors::PlanCraftError;
use crate::memory::embeddings::normalize;

/// Deterministic embedder: hashes lowercase words and character trigrams into a
/// fixed number of buckets, then L2-normalizes. Needs no network.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut v, "w", word, 1.0);

            let chars: Vec<char> = format!("#{word}#").chars().collect();
            for tri in chars.windows(3) {
                let gram: String = tri.iter().collect();
                self.add_feature(&mut v, "t", &gram, 0.5);
            }
        }

        normalize(&mut v);
        v
    }

    fn add_feature(&self, v: &mut [f32], kind: &str, feature: &str, weight: f32) {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(b":");
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();

        let mut idx_bytes = [0u8; 8];
        idx_bytes.copy_from_slice(&digest[..8]);
        let idx = (u64::from_le_bytes(idx_bytes) % self.dimensions as u64) as usize;
        // Sign bit keeps collisions from always adding up.
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingService for HashingEmbedder {
    fn id(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PlanCraftError> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embeddings::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let e = HashingEmbedder::new(128);
        let a = e.embed_sync("Scrape product titles from example.com");
        let b = e.embed_sync("Scrape product titles from example.com");
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let e = HashingEmbedder::new(256);
        let a = e.embed_sync("Extract emails, please!");
        let b = e.embed_sync("extract EMAILS please");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_requests_closer_than_unrelated() {
        let e = HashingEmbedder::new(256);
        let base = e.embed_sync("extract titles and prices from https://shop.example.com");
        let near = e.embed_sync("extract titles and prices from https://store.example.org");
        let far = e.embed_sync("send a weekly summary email to the team");
        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(16);
        assert!(e.embed_sync("   ").iter().all(|x| *x == 0.0));
    }
}

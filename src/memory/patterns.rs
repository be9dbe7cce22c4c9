// src/memory/patterns.rs — Similarity-searchable store of learned plan templates

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::embeddings::{cosine_similarity, decode, encode};
use super::store::PatternRow;
use super::{decay, SharedStore};
use crate::core::types::Step;

/// A past (request, plan) pair that worked, keyed by the request embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: String,
    pub request_text: String,
    pub request_embedding: Vec<f32>,
    /// Steps with entity values generalized to `$entity` placeholders.
    pub plan_template: Vec<Step>,
    pub success_rate: f64,
    /// Outcomes folded into `success_rate`.
    pub sample_count: u32,
    pub reuse_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl Pattern {
    pub fn new(
        request_text: impl Into<String>,
        request_embedding: Vec<f32>,
        plan_template: Vec<Step>,
    ) -> Self {
        let now = Utc::now();
        Self {
            pattern_id: uuid::Uuid::new_v4().to_string(),
            request_text: request_text.into(),
            request_embedding,
            plan_template,
            success_rate: 1.0,
            sample_count: 1,
            reuse_count: 0,
            created_at: now,
            last_used: now,
        }
    }

    fn fold_sample(&mut self, success: bool) {
        let n = self.sample_count as f64;
        let s = if success { 1.0 } else { 0.0 };
        self.success_rate = ((self.success_rate * n + s) / (n + 1.0)).clamp(0.0, 1.0);
        self.sample_count = self.sample_count.saturating_add(1);
        self.last_used = Utc::now();
    }

    fn to_row(&self) -> anyhow::Result<PatternRow> {
        Ok(PatternRow {
            id: self.pattern_id.clone(),
            request_text: self.request_text.clone(),
            embedding: encode(&self.request_embedding)?,
            template: serde_json::to_string(&self.plan_template)?,
            success_rate: self.success_rate,
            sample_count: self.sample_count as i64,
            reuse_count: self.reuse_count as i64,
            created_at: self.created_at.to_rfc3339(),
            last_used_at: self.last_used.to_rfc3339(),
        })
    }

    fn from_row(row: PatternRow) -> anyhow::Result<Self> {
        Ok(Self {
            pattern_id: row.id,
            request_text: row.request_text,
            request_embedding: decode(&row.embedding)?,
            plan_template: serde_json::from_str(&row.template)?,
            success_rate: row.success_rate,
            sample_count: row.sample_count.max(0) as u32,
            reuse_count: row.reuse_count.max(0) as u32,
            created_at: parse_time(&row.created_at),
            last_used: parse_time(&row.last_used_at),
        })
    }
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// A search hit: the pattern and its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern: Pattern,
    pub similarity: f32,
}

/// Copy-on-write pattern store. Readers clone an `Arc` snapshot and never wait on
/// writers; writers are serialized and swap in a new snapshot.
pub struct PatternMemory {
    snapshot: RwLock<Arc<Vec<Pattern>>>,
    writer: Mutex<()>,
    version: AtomicU64,
    store: Option<SharedStore>,
}

impl Default for PatternMemory {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PatternMemory {
    pub fn new(store: Option<SharedStore>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(()),
            version: AtomicU64::new(0),
            store,
        }
    }

    /// Replace the in-memory set with what the durable store holds.
    pub fn load(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let rows = {
            let guard = store.lock().unwrap_or_else(|e| e.into_inner());
            guard.query_all_patterns()?
        };
        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match Pattern::from_row(row) {
                Ok(p) => loaded.push(p),
                Err(e) => warn!(pattern_id = %id, "Skipping unreadable pattern: {}", e),
            }
        }
        let count = loaded.len();
        let _w = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.swap(loaded);
        info!("Loaded {} patterns", count);
        Ok(count)
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<Vec<Pattern>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Bumped on every write.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Patterns with similarity >= `min_similarity`, ranked by similarity, then
    /// success rate, then reuse count.
    pub fn find_similar(
        &self,
        request_embedding: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Vec<PatternMatch> {
        let snapshot = self.snapshot();
        let mut hits: Vec<PatternMatch> = snapshot
            .iter()
            .filter_map(|p| {
                let similarity = cosine_similarity(request_embedding, &p.request_embedding);
                (similarity >= min_similarity).then(|| PatternMatch {
                    pattern: p.clone(),
                    similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(b.pattern.success_rate.total_cmp(&a.pattern.success_rate))
                .then(b.pattern.reuse_count.cmp(&a.pattern.reuse_count))
        });
        hits.truncate(top_k);
        hits
    }

    /// Insert, or replace a pattern with the same id.
    pub fn store(&self, pattern: Pattern) {
        let _w = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = (*self.snapshot()).clone();
        match next.iter_mut().find(|p| p.pattern_id == pattern.pattern_id) {
            Some(existing) => *existing = pattern.clone(),
            None => next.push(pattern.clone()),
        }
        self.swap(next);
        self.persist(&pattern);
        debug!(pattern_id = %pattern.pattern_id, "Stored pattern");
    }

    /// Count a reuse and fold its result into the success rate.
    pub fn record_reuse(&self, pattern_id: &str, success: bool) -> Option<Pattern> {
        self.update(pattern_id, |p| {
            p.reuse_count = p.reuse_count.saturating_add(1);
            p.fold_sample(success);
        })
    }

    /// Fold a success sample in without counting a reuse.
    pub fn merge_success(&self, pattern_id: &str) -> Option<Pattern> {
        self.update(pattern_id, |p| p.fold_sample(true))
    }

    /// Remove patterns not used within `older_than`. Returns how many were evicted.
    pub fn decay(&self, older_than: Duration) -> usize {
        let _w = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = decay::retention_cutoff(Utc::now(), older_than);
        let (keep, expired) = decay::partition_expired(&self.snapshot(), cutoff);
        if expired.is_empty() {
            return 0;
        }
        self.swap(keep);

        if let Some(store) = &self.store {
            let guard = store.lock().unwrap_or_else(|e| e.into_inner());
            for id in &expired {
                if let Err(e) = guard.delete_pattern(id) {
                    warn!(pattern_id = %id, "Failed to delete expired pattern: {}", e);
                }
            }
        }
        info!("Decay: evicted {} unused patterns", expired.len());
        expired.len()
    }

    pub fn get(&self, pattern_id: &str) -> Option<Pattern> {
        self.snapshot()
            .iter()
            .find(|p| p.pattern_id == pattern_id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Pattern> {
        (*self.snapshot()).clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update<F>(&self, pattern_id: &str, f: F) -> Option<Pattern>
    where
        F: FnOnce(&mut Pattern),
    {
        let _w = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = (*self.snapshot()).clone();
        let updated = {
            let p = next.iter_mut().find(|p| p.pattern_id == pattern_id)?;
            f(p);
            p.clone()
        };
        self.swap(next);
        self.persist(&updated);
        Some(updated)
    }

    fn swap(&self, next: Vec<Pattern>) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    // A failed durable write does not roll back the snapshot.
    fn persist(&self, pattern: &Pattern) {
        let Some(store) = &self.store else {
            return;
        };
        let result = pattern.to_row().and_then(|row| {
            let guard = store.lock().unwrap_or_else(|e| e.into_inner());
            guard.upsert_pattern(&row)
        });
        if let Err(e) = result {
            warn!(pattern_id = %pattern.pattern_id, "Failed to persist pattern: {}", e);
        }
    }
}

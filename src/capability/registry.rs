// src/capability/registry.rs — Capability registry and catalog search

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use strsim::{jaro_winkler, normalized_levenshtein};

use super::{Capability, CapabilityProvider, RetryPolicy};
use crate::infra::errors::PlanCraftError;

const FUZZY_THRESHOLD: f64 = 0.85;
const EXAMPLE_SIMILARITY_THRESHOLD: f64 = 0.8;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "from", "with", "into", "all", "this", "that", "then", "them", "its",
    "out", "get", "please", "some", "each", "every", "of", "to", "on", "in", "a", "an",
];

struct Entry {
    capability: Capability,
    provider: Option<Arc<dyn CapabilityProvider>>,
    retry: Option<RetryPolicy>,
}

/// A capability ranked against a free-text query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub capability: Capability,
    pub score: f64,
}

/// Central registry of invocable capabilities.
///
/// Reads are concurrent; registration takes the write lock.
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    fallbacks: RwLock<HashMap<String, String>>,
    default_retry: RetryPolicy,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::with_default_retry(RetryPolicy::default())
    }

    pub fn with_default_retry(default_retry: RetryPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fallbacks: RwLock::new(HashMap::new()),
            default_retry,
        }
    }

    /// Register a provider under its descriptor's id.
    pub fn register(&self, provider: Arc<dyn CapabilityProvider>) -> Result<(), PlanCraftError> {
        let capability = provider.descriptor();
        self.insert(capability, Some(provider), false)
    }

    /// Register a descriptor with no invocation backend (catalog-only, e.g. dry-run planning).
    pub fn register_descriptor(&self, capability: Capability) -> Result<(), PlanCraftError> {
        self.insert(capability, None, false)
    }

    /// Replace an existing registration. Registers fresh if the id is unknown.
    pub fn supersede(&self, provider: Arc<dyn CapabilityProvider>) -> Result<(), PlanCraftError> {
        let capability = provider.descriptor();
        self.insert(capability, Some(provider), true)
    }

    fn insert(
        &self,
        capability: Capability,
        provider: Option<Arc<dyn CapabilityProvider>>,
        replace: bool,
    ) -> Result<(), PlanCraftError> {
        if capability.id.trim().is_empty() {
            return Err(PlanCraftError::Config(
                "capability id must not be empty".into(),
            ));
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let retry = match entries.get(&capability.id) {
            Some(_) if !replace => {
                return Err(PlanCraftError::DuplicateCapability {
                    id: capability.id.clone(),
                })
            }
            Some(existing) => existing.retry.clone(),
            None => None,
        };
        tracing::debug!(capability = %capability.id, replace, "Registered capability");
        entries.insert(
            capability.id.clone(),
            Entry {
                capability,
                provider,
                retry,
            },
        );
        Ok(())
    }

    /// Declare `fallback` as the substitute for `primary` once its retries are exhausted.
    pub fn register_fallback(&self, primary: &str, fallback: &str) -> Result<(), PlanCraftError> {
        if primary == fallback {
            return Err(PlanCraftError::Config(format!(
                "capability '{primary}' cannot be its own fallback"
            )));
        }
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            for id in [primary, fallback] {
                if !entries.contains_key(id) {
                    return Err(PlanCraftError::CapabilityNotFound { id: id.to_string() });
                }
            }
        }
        self.fallbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(primary.to_string(), fallback.to_string());
        Ok(())
    }

    pub fn set_retry_policy(&self, id: &str, policy: RetryPolicy) -> Result<(), PlanCraftError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| PlanCraftError::CapabilityNotFound { id: id.to_string() })?;
        entry.retry = Some(policy);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Result<Capability, PlanCraftError> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|e| e.capability.clone())
            .ok_or_else(|| PlanCraftError::CapabilityNotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn provider(&self, id: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .and_then(|e| e.provider.clone())
    }

    pub fn retry_policy(&self, id: &str) -> RetryPolicy {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .and_then(|e| e.retry.clone())
            .unwrap_or_else(|| self.default_retry.clone())
    }

    pub fn fallback_for(&self, id: &str) -> Option<String> {
        self.fallbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All descriptors, ordered by id.
    pub fn catalog(&self) -> Vec<Capability> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut caps: Vec<Capability> = entries.values().map(|e| e.capability.clone()).collect();
        caps.sort_by(|a, b| a.id.cmp(&b.id));
        caps
    }

    /// Rank capabilities against a free-text query. Zero-score capabilities are dropped.
    pub fn search(&self, query_text: &str) -> Vec<SearchHit> {
        let query_terms = tokenize(query_text);
        if query_terms.is_empty() {
            return Vec::new();
        }
        let query_lower = query_text.to_lowercase();

        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter_map(|entry| {
                let score = score_capability(&entry.capability, &query_terms, &query_lower);
                (score > 0.0).then(|| SearchHit {
                    capability: entry.capability.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.capability.id.cmp(&b.capability.id))
        });
        hits
    }
}

fn score_capability(cap: &Capability, query_terms: &[String], query_lower: &str) -> f64 {
    let id_terms: HashSet<String> = tokenize(&cap.id)
        .into_iter()
        .chain(tokenize(&cap.category))
        .collect();
    let desc_terms: HashSet<String> = tokenize(&cap.description).into_iter().collect();
    let example_terms: HashSet<String> = cap.examples.iter().flat_map(|e| tokenize(e)).collect();

    let mut score = 0.0;
    for term in query_terms {
        score += if id_terms.contains(term) {
            2.0
        } else if desc_terms.contains(term) || example_terms.contains(term) {
            1.0
        } else if fuzzy_contains(&id_terms, term)
            || fuzzy_contains(&desc_terms, term)
            || fuzzy_contains(&example_terms, term)
        {
            0.5
        } else {
            0.0
        };
    }
    score /= query_terms.len() as f64;

    let best_example = cap
        .examples
        .iter()
        .map(|e| jaro_winkler(&e.to_lowercase(), query_lower))
        .fold(0.0_f64, f64::max);
    if best_example >= EXAMPLE_SIMILARITY_THRESHOLD && score > 0.0 {
        score += best_example;
    }
    score
}

fn fuzzy_contains(terms: &HashSet<String>, term: &str) -> bool {
    terms
        .iter()
        .any(|t| normalized_levenshtein(t, term) >= FUZZY_THRESHOLD)
}

/// Lowercase word tokens with stopwords removed and a trailing plural `s` stripped.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .map(|w| {
            if w.len() > 3 && w.ends_with('s') && !w.ends_with("ss") {
                w[..w.len() - 1].to_string()
            } else {
                w
            }
        })
        .collect()
}

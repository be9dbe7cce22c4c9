// src/ledger/mod.rs — Per-capability rolling execution statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::types::{FailureCategory, StepResult};
use crate::infra::config::TimeoutPolicy;
use crate::memory::store::PerformanceRow;
use crate::memory::SharedStore;

pub(crate) const DEFAULT_KEY_WINDOW: usize = 10_000;

/// Rolling statistics for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub capability_id: String,
    pub total: u64,
    pub successes: u64,
    /// Exponential moving average, in milliseconds.
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub failure_categories: BTreeMap<FailureCategory, u64>,
    pub updated_at: DateTime<Utc>,
}

impl PerformanceRecord {
    pub fn new(capability_id: impl Into<String>) -> Self {
        Self {
            capability_id: capability_id.into(),
            total: 0,
            successes: 0,
            avg_latency_ms: 0.0,
            success_rate: 0.0,
            failure_categories: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn avg_latency(&self) -> Duration {
        Duration::from_secs_f64(self.avg_latency_ms.max(0.0) / 1000.0)
    }

    pub fn failures(&self, category: FailureCategory) -> u64 {
        self.failure_categories.get(&category).copied().unwrap_or(0)
    }

    fn apply(&mut self, latency: Duration, success: bool, failure: Option<FailureCategory>, alpha: f64) {
        let ms = latency.as_secs_f64() * 1000.0;
        self.avg_latency_ms = if self.total == 0 {
            ms
        } else {
            alpha * ms + (1.0 - alpha) * self.avg_latency_ms
        };
        self.total += 1;
        if success {
            self.successes += 1;
        } else {
            let category = failure.unwrap_or(FailureCategory::CapabilityError);
            *self.failure_categories.entry(category).or_insert(0) += 1;
        }
        self.success_rate = self.successes as f64 / self.total as f64;
        self.updated_at = Utc::now();
    }

    fn to_row(&self) -> anyhow::Result<PerformanceRow> {
        Ok(PerformanceRow {
            capability_id: self.capability_id.clone(),
            total_invocations: self.total as i64,
            successes: self.successes as i64,
            avg_latency_ms: self.avg_latency_ms,
            failure_categories: serde_json::to_string(&self.failure_categories)?,
            updated_at: self.updated_at.to_rfc3339(),
        })
    }

    fn from_row(row: PerformanceRow) -> anyhow::Result<Self> {
        let total = row.total_invocations.max(0) as u64;
        let successes = row.successes.max(0) as u64;
        Ok(Self {
            capability_id: row.capability_id,
            total,
            successes,
            avg_latency_ms: row.avg_latency_ms,
            success_rate: if total == 0 {
                0.0
            } else {
                successes as f64 / total as f64
            },
            failure_categories: serde_json::from_str(&row.failure_categories)?,
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Identity of one step execution. A sample is applied at most once per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleKey {
    pub plan_id: String,
    pub step_id: String,
    pub capability_id: String,
}

impl SampleKey {
    pub fn new(plan_id: &str, step_id: &str, capability_id: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            step_id: step_id.to_string(),
            capability_id: capability_id.to_string(),
        }
    }
}

/// One execution measurement.
#[derive(Debug, Clone)]
pub struct LedgerSample {
    pub key: SampleKey,
    pub latency: Duration,
    pub success: bool,
    pub failure: Option<FailureCategory>,
}

/// Ledger samples for a finished step, one per capability invoked.
/// Invocations interrupted by the caller's cancellation say nothing about the
/// capability and are left out.
pub fn samples_for(plan_id: &str, result: &StepResult) -> Vec<LedgerSample> {
    result
        .invocations
        .iter()
        .filter(|inv| inv.failure != Some(FailureCategory::Cancelled))
        .map(|inv| LedgerSample {
            key: SampleKey::new(plan_id, &result.step_id, &inv.capability_id),
            latency: inv.latency,
            success: inv.success,
            failure: inv.failure,
        })
        .collect()
}

/// Bounded set of recently seen keys; the oldest key is forgotten first.
pub(crate) struct SeenWindow<K> {
    seen: HashSet<K>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Eq + std::hash::Hash + Clone> SeenWindow<K> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// False when `key` is already in the window.
    pub(crate) fn insert(&mut self, key: K) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

/// Per-capability statistics. Writers lock a single record; reads clone it.
pub struct PerformanceLedger {
    records: RwLock<HashMap<String, Arc<Mutex<PerformanceRecord>>>>,
    applied: Mutex<SeenWindow<SampleKey>>,
    dirty: Mutex<HashSet<String>>,
    alpha: f64,
    store: Option<SharedStore>,
}

impl Default for PerformanceLedger {
    fn default() -> Self {
        Self::new(0.3, None)
    }
}

impl PerformanceLedger {
    pub fn new(alpha: f64, store: Option<SharedStore>) -> Self {
        Self::with_key_window(alpha, store, DEFAULT_KEY_WINDOW)
    }

    pub fn with_key_window(alpha: f64, store: Option<SharedStore>, window: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            applied: Mutex::new(SeenWindow::new(window)),
            dirty: Mutex::new(HashSet::new()),
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            store,
        }
    }

    /// Load persisted records, replacing anything in memory.
    pub fn load(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let rows = {
            let guard = store.lock().unwrap_or_else(|e| e.into_inner());
            guard.query_all_performance()?
        };
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let id = row.capability_id.clone();
            match PerformanceRecord::from_row(row) {
                Ok(rec) => {
                    map.insert(id, Arc::new(Mutex::new(rec)));
                }
                Err(e) => warn!(capability = %id, "Skipping unreadable ledger row: {}", e),
            }
        }
        let count = map.len();
        *self.records.write().unwrap_or_else(|e| e.into_inner()) = map;
        Ok(count)
    }

    /// Unkeyed sample; always applied.
    pub fn record(
        &self,
        capability_id: &str,
        latency: Duration,
        success: bool,
        failure: Option<FailureCategory>,
    ) {
        let slot = self.slot(capability_id);
        slot.lock()
            .unwrap_or_else(|e| e.into_inner())
            .apply(latency, success, failure, self.alpha);
        self.mark_dirty(capability_id);
    }

    /// Keyed sample. Returns `false` when the key was already applied.
    pub fn record_sample(&self, sample: LedgerSample) -> bool {
        let fresh = self
            .applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sample.key.clone());
        if !fresh {
            debug!(
                plan_id = %sample.key.plan_id,
                step_id = %sample.key.step_id,
                "Ignoring duplicate ledger sample"
            );
            return false;
        }
        self.record(
            &sample.key.capability_id,
            sample.latency,
            sample.success,
            sample.failure,
        );
        true
    }

    /// Count a failure that happened before any invocation (e.g. at planning time).
    pub fn note_failure(&self, capability_id: &str, category: FailureCategory) {
        let slot = self.slot(capability_id);
        {
            let mut rec = slot.lock().unwrap_or_else(|e| e.into_inner());
            *rec.failure_categories.entry(category).or_insert(0) += 1;
            rec.updated_at = Utc::now();
        }
        self.mark_dirty(capability_id);
    }

    pub fn get(&self, capability_id: &str) -> Option<PerformanceRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(capability_id)
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// Every record, ordered by capability id.
    pub fn all(&self) -> Vec<PerformanceRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<PerformanceRecord> = records
            .values()
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect();
        out.sort_by(|a, b| a.capability_id.cmp(&b.capability_id));
        out
    }

    /// Observed success rate, once at least `min_samples` invocations were recorded.
    pub fn reliability(&self, capability_id: &str, min_samples: u64) -> Option<f64> {
        self.get(capability_id)
            .filter(|r| r.total > 0 && r.total >= min_samples)
            .map(|r| r.success_rate)
    }

    /// Adaptive timeout: average latency times the multiplier, within floor and ceiling.
    pub fn timeout_for(&self, capability_id: &str, policy: &TimeoutPolicy) -> Duration {
        match self.get(capability_id).filter(|r| r.total > 0) {
            Some(rec) => {
                let scaled = rec.avg_latency_ms * policy.multiplier.max(1.0);
                let ms = scaled.clamp(
                    policy.floor.as_millis() as f64,
                    policy.ceiling.as_millis().max(policy.floor.as_millis()) as f64,
                );
                Duration::from_millis(ms as u64)
            }
            None => policy.default,
        }
    }

    /// Persist records changed since the last flush. Returns how many were written.
    pub fn flush(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let dirty: Vec<String> = self
            .dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        let mut written = 0;
        for id in dirty {
            if let Some(rec) = self.get(&id) {
                let row = rec.to_row()?;
                store
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .upsert_performance(&row)?;
                written += 1;
            }
        }
        if written > 0 {
            debug!("Flushed {} ledger records", written);
        }
        Ok(written)
    }

    fn slot(&self, capability_id: &str) -> Arc<Mutex<PerformanceRecord>> {
        if let Some(slot) = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(capability_id)
        {
            return slot.clone();
        }
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records
            .entry(capability_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PerformanceRecord::new(capability_id))))
            .clone()
    }

    fn mark_dirty(&self, capability_id: &str) {
        self.dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(capability_id.to_string());
    }
}

// src/planner/confidence.rs — Plan confidence scoring

use crate::capability::CapabilityRegistry;
use crate::core::types::Step;
use crate::ledger::PerformanceLedger;

/// Certainty assumed when the reasoning service does not report one.
pub const DEFAULT_CERTAINTY: f64 = 0.5;

/// Observed success rate once enough samples exist, else the descriptor's hint.
pub fn reliability(
    capability_id: &str,
    registry: &CapabilityRegistry,
    ledger: &PerformanceLedger,
    min_samples: u64,
) -> f64 {
    ledger
        .reliability(capability_id, min_samples)
        .or_else(|| {
            registry
                .lookup(capability_id)
                .ok()
                .map(|c| c.performance_hint.reliability)
        })
        .unwrap_or(0.0)
        .clamp(0.0, 1.0)
}

/// `certainty × mean(reliability)`, clamped to [0, 1]. No steps scores 0.
pub fn score(
    certainty: Option<f64>,
    steps: &[Step],
    registry: &CapabilityRegistry,
    ledger: &PerformanceLedger,
    min_samples: u64,
) -> f64 {
    if steps.is_empty() {
        return 0.0;
    }
    let certainty = certainty
        .filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_CERTAINTY)
        .clamp(0.0, 1.0);
    let mean = steps
        .iter()
        .map(|s| reliability(&s.capability_id, registry, ledger, min_samples))
        .sum::<f64>()
        / steps.len() as f64;
    (certainty * mean).clamp(0.0, 1.0)
}

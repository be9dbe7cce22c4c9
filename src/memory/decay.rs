// src/memory/decay.rs — Age-based pattern retention

use chrono::{DateTime, Duration, Utc};

use super::patterns::Pattern;

/// Cutoff before which an unused pattern expires.
pub fn retention_cutoff(now: DateTime<Utc>, older_than: Duration) -> DateTime<Utc> {
    now - older_than
}

/// Split patterns into survivors and the ids of expired ones.
pub fn partition_expired(
    patterns: &[Pattern],
    cutoff: DateTime<Utc>,
) -> (Vec<Pattern>, Vec<String>) {
    let mut keep = Vec::with_capacity(patterns.len());
    let mut expired = Vec::new();
    for p in patterns {
        if p.last_used < cutoff {
            expired.push(p.pattern_id.clone());
        } else {
            keep.push(p.clone());
        }
    }
    (keep, expired)
}

// src/cli/inspect.rs — Read-only views over stored plans, patterns and the ledger

use crate::core::types::Plan;
use crate::infra::config::Config;
use crate::ledger::{PerformanceLedger, PerformanceRecord};
use crate::memory::{Pattern, PatternMemory};

pub fn run_inspect(config: &Config, plan_id: &str) -> anyhow::Result<()> {
    let store = super::open_store(config)?;
    let row = store
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get_plan(plan_id)?;
    let Some(row) = row else {
        anyhow::bail!("no plan with id {plan_id}");
    };

    let plan: Plan = serde_json::from_str(&row.body)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    if let Some(outcome) = row.outcome {
        let outcome: serde_json::Value = serde_json::from_str(&outcome)?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        eprintln!("(not executed)");
    }
    Ok(())
}

pub fn run_perf(config: &Config, capability: Option<&str>) -> anyhow::Result<()> {
    let store = super::open_store(config)?;
    let ledger = PerformanceLedger::new(config.learning.ema_alpha, Some(store));
    ledger.load()?;

    let records = match capability {
        Some(id) => ledger.get(id).into_iter().collect(),
        None => ledger.all(),
    };
    if records.is_empty() {
        println!("No performance data yet.");
        return Ok(());
    }
    println!(
        "{:<28} {:>8} {:>8} {:>10}  failures",
        "capability", "calls", "success", "latency"
    );
    for rec in &records {
        println!("{}", format_record(rec));
    }
    Ok(())
}

pub fn run_patterns(config: &Config, limit: usize) -> anyhow::Result<()> {
    let store = super::open_store(config)?;
    let memory = PatternMemory::new(Some(store));
    memory.load()?;

    let mut patterns = memory.all();
    if patterns.is_empty() {
        println!("No learned patterns yet.");
        return Ok(());
    }
    patterns.sort_by(|a, b| b.last_used.cmp(&a.last_used));
    for p in patterns.iter().take(limit) {
        println!("{}", format_pattern(p));
    }
    if patterns.len() > limit {
        println!("... {} more", patterns.len() - limit);
    }
    Ok(())
}

pub fn run_decay(config: &Config, days: Option<u32>) -> anyhow::Result<()> {
    let store = super::open_store(config)?;
    let memory = PatternMemory::new(Some(store));
    memory.load()?;

    let days = days.unwrap_or(config.learning.retention_days);
    let evicted = memory.decay(chrono::Duration::days(i64::from(days)));
    println!(
        "Evicted {evicted} pattern(s) unused for {days} day(s); {} remain.",
        memory.len()
    );
    Ok(())
}

fn format_record(rec: &PerformanceRecord) -> String {
    let failures = rec
        .failure_categories
        .iter()
        .map(|(cat, n)| format!("{cat}={n}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{:<28} {:>8} {:>7.0}% {:>8}ms  {}",
        rec.capability_id,
        rec.total,
        rec.success_rate * 100.0,
        rec.avg_latency_ms.round() as u64,
        failures
    )
}

fn format_pattern(p: &Pattern) -> String {
    let caps = p
        .plan_template
        .iter()
        .map(|s| s.capability_id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");
    format!(
        "{}  success={:.2} reused={} last_used={}\n    {}\n    {}",
        p.pattern_id,
        p.success_rate,
        p.reuse_count,
        p.last_used.format("%Y-%m-%d"),
        p.request_text,
        caps
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FailureCategory, Step};
    use std::time::Duration;

    #[test]
    fn test_format_record() {
        let ledger = PerformanceLedger::default();
        ledger.record("fetch_page", Duration::from_millis(120), true, None);
        ledger.record("fetch_page", Duration::from_millis(120), false, Some(FailureCategory::Timeout));
        let line = format_record(&ledger.get("fetch_page").unwrap());
        assert!(line.starts_with("fetch_page"));
        assert!(line.contains("120ms"));
        assert!(line.contains("timeout=1"));
    }

    #[test]
    fn test_format_pattern_shows_capability_chain() {
        let p = Pattern::new(
            "extract emails from example.com",
            vec![1.0],
            vec![Step::new("s1", "fetch_page"), Step::new("s2", "extract_emails")],
        );
        let text = format_pattern(&p);
        assert!(text.contains("fetch_page -> extract_emails"));
        assert!(text.contains("extract emails from example.com"));
    }
}

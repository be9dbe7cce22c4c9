// src/cli/plan.rs — Dry-run planning against a YAML capability catalog

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::capability::{Capability, CapabilityRegistry, RetryPolicy};
use crate::core::types::RequestContext;
use crate::infra::config::Config;
use crate::ledger::PerformanceLedger;
use crate::memory::PatternMemory;
use crate::planner::Planner;
use crate::provider;

/// Catalog file layout:
///
/// ```yaml
/// capabilities:
///   - id: fetch_page
///     description: Download a web page
///     input_schema: {type: object, required: [url]}
/// fallbacks:
///   fetch_page: fetch_page_headless
/// ```
#[derive(Debug, Deserialize)]
pub struct CatalogFile {
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub fallbacks: BTreeMap<String, String>,
}

/// Descriptor-only registry built from catalog YAML.
pub fn parse_catalog(yaml: &str, retry: RetryPolicy) -> anyhow::Result<CapabilityRegistry> {
    let file: CatalogFile = serde_yml::from_str(yaml)?;
    let registry = CapabilityRegistry::with_default_retry(retry);
    for cap in file.capabilities {
        registry.register_descriptor(cap)?;
    }
    for (primary, fallback) in &file.fallbacks {
        registry.register_fallback(primary, fallback)?;
    }
    Ok(registry)
}

pub fn load_catalog(path: &Path, retry: RetryPolicy) -> anyhow::Result<CapabilityRegistry> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read catalog {}: {e}", path.display()))?;
    parse_catalog(&yaml, retry)
}

pub async fn run_plan(
    config: &Config,
    request: &str,
    catalog: &Path,
    allow_reuse: bool,
    notes: Option<String>,
) -> anyhow::Result<()> {
    let registry = Arc::new(load_catalog(catalog, config.executor.retry.to_policy())?);
    let store = super::open_store(config)?;

    let patterns = Arc::new(PatternMemory::new(Some(store.clone())));
    patterns.load()?;
    let ledger = Arc::new(PerformanceLedger::new(
        config.learning.ema_alpha,
        Some(store.clone()),
    ));
    ledger.load()?;

    let planner = Planner::new(
        registry,
        patterns,
        ledger,
        provider::build_reasoner(&config.reasoning)?,
        provider::build_embedder(&config.embedding, &config.reasoning)?,
        config.planner.clone(),
    );

    let mut context = RequestContext {
        allow_reuse,
        ..RequestContext::default()
    };
    if let Some(notes) = notes {
        context = context.with_notes(notes);
    }
    let planned = planner.plan_detailed(request, &context).await;
    let plan = &planned.plan;

    store
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert_plan(
            &plan.plan_id,
            &plan.source_request,
            &plan.origin.to_string(),
            plan.confidence,
            &serde_json::to_string(plan)?,
        )?;

    eprintln!(
        "[plan] {} origin={} steps={} confidence={:.2} reasoning_calls={} ({}ms)",
        plan.plan_id,
        plan.origin,
        plan.steps.len(),
        plan.confidence,
        planned.reasoning_calls,
        planned.elapsed.as_millis(),
    );
    println!("{}", serde_json::to_string_pretty(plan)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
capabilities:
  - id: fetch_page
    description: Download the HTML of a web page
    category: fetch
    input_schema:
      type: object
      properties:
        url: {type: string}
      required: [url]
    output_schema:
      type: object
      properties:
        html: {type: string}
  - id: fetch_page_headless
    description: Render a page in a headless browser
    performance_hint:
      speed: slow
      reliability: 0.97
fallbacks:
  fetch_page: fetch_page_headless
"#;

    #[test]
    fn test_parse_catalog() {
        let reg = parse_catalog(CATALOG, RetryPolicy::none()).unwrap();
        assert_eq!(reg.len(), 2);
        let fetch = reg.lookup("fetch_page").unwrap();
        assert_eq!(fetch.required_inputs(), vec!["url"]);
        assert_eq!(fetch.declared_outputs(), Some(vec!["html"]));
        assert_eq!(reg.fallback_for("fetch_page").as_deref(), Some("fetch_page_headless"));
        let headless = reg.lookup("fetch_page_headless").unwrap();
        assert!((headless.performance_hint.reliability - 0.97).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_to_unknown_capability_is_rejected() {
        let yaml = "capabilities:\n  - id: a\n    description: x\nfallbacks:\n  a: missing\n";
        assert!(parse_catalog(yaml, RetryPolicy::none()).is_err());
    }

    #[test]
    fn test_duplicate_capability_is_rejected() {
        let yaml = "capabilities:\n  - id: a\n    description: x\n  - id: a\n    description: y\n";
        assert!(parse_catalog(yaml, RetryPolicy::none()).is_err());
    }
}

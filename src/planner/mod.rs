// src/planner/mod.rs — Turns a request into a validated, confidence-scored plan

pub mod confidence;
pub mod entities;
pub mod prompt;
pub mod template;
pub mod validate;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capability::{Capability, CapabilityRegistry};
use crate::core::types::{Plan, PlanOrigin, RequestContext};
use crate::infra::config::PlannerConfig;
use crate::ledger::PerformanceLedger;
use crate::memory::{PatternMatch, PatternMemory};
use crate::provider::{EmbeddingService, ReasoningService};
use entities::{Entities, EntityExtractor, RuleExtractor};
use prompt::CatalogItem;
use validate::ValidationIssue;

/// A plan plus what the planner learned about the request along the way.
#[derive(Debug, Clone)]
pub struct Planned {
    pub plan: Plan,
    /// `None` when the embedding service failed.
    pub embedding: Option<Vec<f32>>,
    pub entities: Entities,
    pub reasoning_calls: u32,
    pub elapsed: Duration,
}

pub struct Planner {
    registry: Arc<CapabilityRegistry>,
    patterns: Arc<PatternMemory>,
    ledger: Arc<PerformanceLedger>,
    reasoner: Arc<dyn ReasoningService>,
    embedder: Arc<dyn EmbeddingService>,
    extractor: Arc<dyn EntityExtractor>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        patterns: Arc<PatternMemory>,
        ledger: Arc<PerformanceLedger>,
        reasoner: Arc<dyn ReasoningService>,
        embedder: Arc<dyn EmbeddingService>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            registry,
            patterns,
            ledger,
            reasoner,
            embedder,
            extractor: Arc::new(RuleExtractor),
            config,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn extractor(&self) -> Arc<dyn EntityExtractor> {
        self.extractor.clone()
    }

    /// Plan a request. Never fails: an unsatisfiable request yields a plan with no
    /// steps, zero confidence and an explanation.
    pub async fn plan(&self, request: &str, context: &RequestContext) -> Plan {
        self.plan_detailed(request, context).await.plan
    }

    pub async fn plan_detailed(&self, request: &str, context: &RequestContext) -> Planned {
        let started = Instant::now();
        let entities = self.extractor.extract(request);

        let embedding = match self.embedder.embed(request).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Embedding failed, skipping pattern lookup: {}", e);
                None
            }
        };

        let matches = embedding
            .as_deref()
            .map(|e| {
                self.patterns
                    .find_similar(e, self.config.top_k, self.config.weak_prior_threshold)
            })
            .unwrap_or_default();

        if context.allow_reuse {
            if let Some(plan) = self.try_adapt(request, &matches, &entities) {
                return self.finish(plan, embedding, entities, 0, started);
            }
        }

        let (plan, calls) = self
            .plan_fresh(request, context, matches.first())
            .await;
        self.finish(plan, embedding, entities, calls, started)
    }

    fn finish(
        &self,
        plan: Plan,
        embedding: Option<Vec<f32>>,
        entities: Entities,
        reasoning_calls: u32,
        started: Instant,
    ) -> Planned {
        info!(
            plan_id = %plan.plan_id,
            origin = %plan.origin,
            steps = plan.steps.len(),
            confidence = plan.confidence,
            "Plan ready"
        );
        Planned {
            plan,
            embedding,
            entities,
            reasoning_calls,
            elapsed: started.elapsed(),
        }
    }

    /// Reuse a stored pattern at or above the reuse threshold. Among those, higher
    /// success rate wins, then higher reuse count.
    fn try_adapt(
        &self,
        request: &str,
        matches: &[PatternMatch],
        entities: &Entities,
    ) -> Option<Plan> {
        let mut candidates: Vec<&PatternMatch> = matches
            .iter()
            .filter(|m| m.similarity >= self.config.reuse_threshold)
            .collect();
        candidates.sort_by(|a, b| {
            b.pattern
                .success_rate
                .total_cmp(&a.pattern.success_rate)
                .then(b.pattern.reuse_count.cmp(&a.pattern.reuse_count))
                .then(b.similarity.total_cmp(&a.similarity))
        });

        for candidate in candidates {
            let pattern = &candidate.pattern;
            let mut steps = match template::rebind(&pattern.plan_template, entities) {
                Ok(steps) => steps,
                Err(issue) => {
                    debug!(pattern_id = %pattern.pattern_id, "Pattern not reusable: {}", issue);
                    continue;
                }
            };
            let issues = validate::validate(&mut steps, &self.registry);
            if !issues.is_empty() {
                debug!(
                    pattern_id = %pattern.pattern_id,
                    "Adapted plan failed validation: {}",
                    join_issues(&issues)
                );
                continue;
            }

            let mut plan = Plan::new(request, steps, PlanOrigin::Adapted);
            plan.source_pattern_id = Some(pattern.pattern_id.clone());
            plan.set_confidence(pattern.success_rate - self.config.adaptation_penalty);
            if plan.confidence <= 0.0 {
                continue;
            }
            info!(
                pattern_id = %pattern.pattern_id,
                similarity = candidate.similarity,
                "Reusing stored pattern"
            );
            return Some(plan);
        }
        None
    }

    async fn plan_fresh(
        &self,
        request: &str,
        context: &RequestContext,
        hint: Option<&PatternMatch>,
    ) -> (Plan, u32) {
        let catalog = self.catalog_for(request, hint);
        if catalog.is_empty() {
            return (
                Plan::cannot_satisfy(request, "no capabilities are registered", Vec::new()),
                0,
            );
        }

        let schema = prompt::output_schema();
        let mut issues: Vec<ValidationIssue> = Vec::new();
        let mut previous: Option<serde_json::Value> = None;
        let mut calls = 0;

        for attempt in 0..=self.config.repair_attempts {
            let text = match prompt::render(&prompt::PromptInput {
                request,
                context,
                catalog: &catalog,
                hint,
                issues: &issues,
                previous: previous.as_ref(),
            }) {
                Ok(t) => t,
                Err(e) => return (Plan::cannot_satisfy(request, e.to_string(), issues), calls),
            };

            calls += 1;
            let raw = match self.reasoner.generate_structured(&text, &schema).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(attempt, "Reasoning service failed: {}", e);
                    return (
                        Plan::cannot_satisfy(
                            request,
                            format!("could not plan: reasoning service failed ({e})"),
                            issues,
                        ),
                        calls,
                    );
                }
            };

            let oracle = match prompt::parse_oracle_plan(raw.clone()) {
                Ok(o) => o,
                Err(issue) => {
                    issues = vec![issue];
                    previous = Some(raw);
                    continue;
                }
            };

            if oracle.steps.is_empty() {
                let explanation = oracle
                    .explanation
                    .unwrap_or_else(|| "no combination of capabilities satisfies the request".into());
                return (
                    Plan::cannot_satisfy(request, explanation, vec![ValidationIssue::NoSteps]),
                    calls,
                );
            }

            let mut steps = oracle.steps;
            let found = validate::validate(&mut steps, &self.registry);
            if found.is_empty() {
                let confidence = confidence::score(
                    oracle.certainty,
                    &steps,
                    &self.registry,
                    &self.ledger,
                    self.config.min_reliability_samples,
                );
                let mut plan = Plan::new(request, steps, PlanOrigin::Fresh);
                plan.explanation = oracle.explanation;
                plan.set_confidence(confidence);
                return (plan, calls);
            }

            warn!(attempt, "Candidate plan rejected: {}", join_issues(&found));
            issues = found;
            previous = Some(raw);
        }

        let explanation = format!("could not produce a valid plan: {}", join_issues(&issues));
        (Plan::cannot_satisfy(request, explanation, issues), calls)
    }

    /// Search hits ranked first, then the rest of the catalog. Capabilities below
    /// the reliability floor move behind the others, keeping their relative order,
    /// before the list is capped at `catalog_size`. Capabilities the hint uses are
    /// always included.
    fn catalog_for(&self, request: &str, hint: Option<&PatternMatch>) -> Vec<CatalogItem> {
        let mut catalog: Vec<CatalogItem> = Vec::new();
        let hits = self.registry.search(request).into_iter().map(|h| h.capability);
        for cap in hits.chain(self.registry.catalog()) {
            if !catalog.iter().any(|c| c.capability.id == cap.id) {
                catalog.push(self.rate(cap));
            }
        }
        let floor = self.config.reliability_floor;
        catalog.sort_by_key(|item| item.reliability < floor);
        catalog.truncate(self.config.catalog_size.max(1));

        if let Some(hint) = hint {
            for step in &hint.pattern.plan_template {
                if catalog.iter().any(|c| c.capability.id == step.capability_id) {
                    continue;
                }
                if let Ok(cap) = self.registry.lookup(&step.capability_id) {
                    catalog.push(self.rate(cap));
                }
            }
        }
        catalog
    }

    fn rate(&self, capability: Capability) -> CatalogItem {
        let reliability = confidence::reliability(
            &capability.id,
            &self.registry,
            &self.ledger,
            self.config.min_reliability_samples,
        );
        CatalogItem {
            capability,
            reliability,
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::errors::PlanCraftError;
    use crate::provider::embedder::HashingEmbedder;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Offline;

    #[async_trait]
    impl ReasoningService for Offline {
        fn id(&self) -> &str {
            "offline"
        }

        async fn generate_structured(
            &self,
            _prompt: &str,
            _output_schema: &serde_json::Value,
        ) -> Result<serde_json::Value, PlanCraftError> {
            Err(PlanCraftError::PlanningFailure {
                reason: "offline".into(),
            })
        }
    }

    fn planner(catalog_size: usize) -> (Planner, Arc<PerformanceLedger>) {
        let registry = CapabilityRegistry::new();
        registry
            .register_descriptor(Capability::new("flaky_fetch", "Fetch a web page"))
            .unwrap();
        registry
            .register_descriptor(Capability::new("steady_fetch", "Fetch a web page"))
            .unwrap();
        let ledger = Arc::new(PerformanceLedger::default());
        let config = PlannerConfig {
            catalog_size,
            ..PlannerConfig::default()
        };
        let planner = Planner::new(
            Arc::new(registry),
            Arc::new(PatternMemory::default()),
            ledger.clone(),
            Arc::new(Offline),
            Arc::new(HashingEmbedder::new(32)),
            config,
        );
        (planner, ledger)
    }

    fn ids(catalog: &[CatalogItem]) -> Vec<&str> {
        catalog.iter().map(|c| c.capability.id.as_str()).collect()
    }

    #[test]
    fn test_unreliable_capability_is_listed_last() {
        let (planner, ledger) = planner(10);
        for _ in 0..4 {
            ledger.record("flaky_fetch", Duration::from_millis(10), false, None);
        }
        let catalog = planner.catalog_for("fetch a web page", None);
        assert_eq!(ids(&catalog), vec!["steady_fetch", "flaky_fetch"]);
        assert_eq!(catalog[1].reliability, 0.0);
        assert!((catalog[0].reliability - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_unreliable_capability_drops_out_of_a_full_catalog() {
        let (planner, ledger) = planner(1);
        for _ in 0..4 {
            ledger.record("flaky_fetch", Duration::from_millis(10), false, None);
        }
        let catalog = planner.catalog_for("fetch a web page", None);
        assert_eq!(ids(&catalog), vec!["steady_fetch"]);
    }

    #[test]
    fn test_reliable_capabilities_keep_search_order() {
        let (planner, _) = planner(10);
        let catalog = planner.catalog_for("flaky", None);
        assert_eq!(ids(&catalog)[0], "flaky_fetch");
    }
}

// tests/planner_test.rs — Integration test: planning, reuse and learning loop

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use plancraft::core::types::{PlanOrigin, RequestContext, StepStatus};
use plancraft::infra::config::{LearningMode, PlannerConfig};
use plancraft::ledger::PerformanceLedger;
use plancraft::memory::PatternMemory;
use plancraft::planner::validate::ValidationIssue;
use plancraft::planner::Planner;
use plancraft::provider::embedder::HashingEmbedder;

const REQUEST: &str = "extract emails from https://example.com";

#[tokio::test]
async fn test_fresh_plan_executes_and_is_learned() {
    let fetch = fetch_page();
    let extract = extract_emails();
    let reasoner = ScriptedReasoner::new(vec![fetch_extract_answer("https://example.com")]);
    let config = test_config(LearningMode::Inline);
    let engine = engine(
        registry_with(&[fetch.clone(), extract.clone()]),
        reasoner.clone(),
        None,
        &config,
    );

    let report = engine.submit_request(REQUEST, &RequestContext::default()).await;
    let outcome = report.outcome.expect("plan should execute");

    assert_eq!(report.plan.origin, PlanOrigin::Fresh);
    assert_eq!(report.plan.steps.len(), 2);
    assert!(outcome.overall_success);
    assert_eq!(
        outcome.result("s2").unwrap().output,
        Some(json!({"emails": ["info@example.com"]}))
    );

    // s2 only starts once s1 has finished.
    let (_, fetch_end) = fetch.first_span().unwrap();
    let (extract_start, _) = extract.first_span().unwrap();
    assert!(extract_start >= fetch_end);

    assert_eq!(engine.patterns().len(), 1);
    assert_eq!(reasoner.calls(), 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_repeated_request_reuses_pattern() {
    let reasoner = ScriptedReasoner::new(vec![fetch_extract_answer("https://example.com")]);
    let config = test_config(LearningMode::Inline);
    let engine = engine(
        registry_with(&[fetch_page(), extract_emails()]),
        reasoner.clone(),
        None,
        &config,
    );

    let first = engine.submit_request(REQUEST, &RequestContext::default()).await;
    assert!(first.outcome.unwrap().overall_success);
    let pattern = engine.patterns().all().remove(0);

    let second = engine.submit_request(REQUEST, &RequestContext::default()).await;
    assert_eq!(second.plan.origin, PlanOrigin::Adapted);
    assert_eq!(second.plan.source_pattern_id.as_deref(), Some(pattern.pattern_id.as_str()));
    assert_eq!(reasoner.calls(), 1, "reuse must skip the reasoning call");
    let expected = pattern.success_rate - config.planner.adaptation_penalty;
    assert!((second.plan.confidence - expected).abs() < 1e-9);
    assert!(second.outcome.unwrap().overall_success);

    let reused = engine.patterns().get(&pattern.pattern_id).unwrap();
    assert_eq!(reused.reuse_count, 1);
}

#[tokio::test]
async fn test_reuse_disabled_by_context() {
    let reasoner = ScriptedReasoner::new(vec![fetch_extract_answer("https://example.com")]);
    let config = test_config(LearningMode::Inline);
    let engine = engine(
        registry_with(&[fetch_page(), extract_emails()]),
        reasoner.clone(),
        None,
        &config,
    );
    engine.submit_request(REQUEST, &RequestContext::default()).await;

    let ctx = RequestContext {
        allow_reuse: false,
        ..RequestContext::default()
    };
    let again = engine.submit_request(REQUEST, &ctx).await;
    assert_eq!(again.plan.origin, PlanOrigin::Fresh);
    assert_eq!(reasoner.calls(), 2);
}

#[tokio::test]
async fn test_second_planning_is_not_slower() {
    let registry = registry_with(&[fetch_page(), extract_emails()]);
    let patterns = Arc::new(PatternMemory::default());
    let ledger = Arc::new(PerformanceLedger::default());
    let reasoner = ScriptedReasoner::slow(
        vec![fetch_extract_answer("https://example.com")],
        Duration::from_millis(30),
    );
    let embedder = Arc::new(HashingEmbedder::new(128));
    let planner = Planner::new(
        registry.clone(),
        patterns.clone(),
        ledger.clone(),
        reasoner.clone(),
        embedder.clone(),
        PlannerConfig::default(),
    );
    let coordinator = plancraft::learner::LearningCoordinator::new(
        patterns.clone(),
        ledger.clone(),
        embedder,
        planner.extractor(),
        None,
        Default::default(),
    );
    let executor = plancraft::executor::Executor::new(registry, ledger, Default::default());

    let first = planner.plan_detailed(REQUEST, &RequestContext::default()).await;
    let outcome = executor
        .execute(&first.plan, &tokio_util::sync::CancellationToken::new())
        .await;
    coordinator.ingest(&first.plan, &outcome).await;

    let second = planner.plan_detailed(REQUEST, &RequestContext::default()).await;
    assert_eq!(second.plan.origin, PlanOrigin::Adapted);
    assert_eq!(second.reasoning_calls, 0);
    assert!(second.elapsed <= first.elapsed);
}

#[tokio::test]
async fn test_invalid_oracle_plan_is_repaired_once() {
    let bad = json!({
        "steps": [{"step_id": "s1", "capability_id": "teleport", "parameters": {}}],
        "certainty": 0.9
    });
    let reasoner = ScriptedReasoner::new(vec![bad, fetch_extract_answer("https://example.com")]);
    let config = test_config(LearningMode::Inline);
    let engine = engine(
        registry_with(&[fetch_page(), extract_emails()]),
        reasoner.clone(),
        None,
        &config,
    );

    let report = engine.submit_request(REQUEST, &RequestContext::default()).await;
    assert_eq!(reasoner.calls(), 2);
    assert!(report.plan.is_executable());
    assert!(report.outcome.unwrap().overall_success);
}

#[tokio::test]
async fn test_unfixable_plan_is_reported_not_executed() {
    let cyclic = json!({
        "steps": [
            {"step_id": "a", "capability_id": "fetch_page", "parameters": {"url": "x"}, "depends_on": ["b"]},
            {"step_id": "b", "capability_id": "fetch_page", "parameters": {"url": "y"}, "depends_on": ["a"]}
        ]
    });
    let fetch = fetch_page();
    let reasoner = ScriptedReasoner::new(vec![cyclic]);
    let config = test_config(LearningMode::Inline);
    let engine = engine(registry_with(&[fetch.clone()]), reasoner.clone(), None, &config);

    let report = engine.submit_request("fetch two pages", &RequestContext::default()).await;
    assert!(report.outcome.is_none());
    assert_eq!(report.plan.confidence, 0.0);
    assert!(report
        .plan
        .rejection
        .iter()
        .any(|i| matches!(i, ValidationIssue::Cycle { .. })));
    assert!(report.summary.starts_with("Could not plan this request"));
    assert_eq!(reasoner.calls(), 1 + config.planner.repair_attempts);
    assert_eq!(fetch.calls(), 0);
}

#[tokio::test]
async fn test_oracle_declining_yields_explanation() {
    let reasoner = ScriptedReasoner::new(vec![json!({
        "steps": [],
        "explanation": "no capability can send email"
    })]);
    let config = test_config(LearningMode::Inline);
    let engine = engine(registry_with(&[fetch_page()]), reasoner, None, &config);

    let report = engine
        .submit_request("email the report to bob@example.com", &RequestContext::default())
        .await;
    assert!(report.outcome.is_none());
    assert_eq!(report.plan.explanation.as_deref(), Some("no capability can send email"));
    assert_eq!(report.plan.rejection, vec![ValidationIssue::NoSteps]);
}

#[tokio::test]
async fn test_confidence_stays_in_unit_interval() {
    let config = test_config(LearningMode::Inline);
    for certainty in [json!(-3.0), json!(0.0), json!(0.4), json!(1.0), json!(7.5)] {
        let mut answer = fetch_extract_answer("https://example.com");
        answer["certainty"] = certainty;
        let engine = engine(
            registry_with(&[fetch_page(), extract_emails()]),
            ScriptedReasoner::new(vec![answer]),
            None,
            &config,
        );
        let plan = engine
            .planner()
            .plan(REQUEST, &RequestContext::default())
            .await;
        assert!((0.0..=1.0).contains(&plan.confidence), "got {}", plan.confidence);
    }
}

#[tokio::test]
async fn test_inspect_plan_returns_submitted_plan() {
    let config = test_config(LearningMode::Inline);
    let engine = engine(
        registry_with(&[fetch_page(), extract_emails()]),
        ScriptedReasoner::new(vec![fetch_extract_answer("https://example.com")]),
        None,
        &config,
    );
    let report = engine.submit_request(REQUEST, &RequestContext::default()).await;
    let seen = engine.inspect_plan(&report.plan.plan_id).unwrap();
    assert_eq!(seen.steps.len(), 2);
    assert!(seen.steps.iter().all(|s| s.status == StepStatus::Pending));
    assert!(engine.inspect_plan("missing").is_none());
}

// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::planner::validate::ValidationIssue;

/// Lifecycle of a single step within a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One capability invocation within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub capability_id: String,
    /// JSON object; may hold `{"$ref": ...}` references to upstream outputs.
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub status: StepStatus,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Step {
    pub fn new(step_id: impl Into<String>, capability_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            capability_id: capability_id.into(),
            parameters: empty_object(),
            depends_on: BTreeSet::new(),
            status: StepStatus::Pending,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.insert(step_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanOrigin {
    /// Produced by the reasoning service for this request.
    Fresh,
    /// Rebound from a stored pattern.
    Adapted,
}

impl fmt::Display for PlanOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanOrigin::Fresh => f.write_str("fresh"),
            PlanOrigin::Adapted => f.write_str("adapted"),
        }
    }
}

/// A confidence-scored DAG of steps intended to satisfy a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub source_request: String,
    pub steps: Vec<Step>,
    pub confidence: f64,
    pub origin: PlanOrigin,
    /// Pattern this plan was adapted from.
    #[serde(default)]
    pub source_pattern_id: Option<String>,
    /// Human-readable reason when the plan cannot satisfy the request.
    #[serde(default)]
    pub explanation: Option<String>,
    /// Validation issues behind a planning failure.
    #[serde(default)]
    pub rejection: Vec<ValidationIssue>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(source_request: impl Into<String>, steps: Vec<Step>, origin: PlanOrigin) -> Self {
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            source_request: source_request.into(),
            steps,
            confidence: 0.0,
            origin,
            source_pattern_id: None,
            explanation: None,
            rejection: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// The "cannot satisfy" plan: no steps, zero confidence.
    pub fn cannot_satisfy(
        source_request: impl Into<String>,
        explanation: impl Into<String>,
        rejection: Vec<ValidationIssue>,
    ) -> Self {
        let mut plan = Self::new(source_request, Vec::new(), PlanOrigin::Fresh);
        plan.explanation = Some(explanation.into());
        plan.rejection = rejection;
        plan
    }

    /// Set confidence, clamped to [0, 1]. A plan without steps always scores 0.
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = if self.steps.is_empty() || !confidence.is_finite() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
    }

    pub fn is_executable(&self) -> bool {
        !self.steps.is_empty() && self.confidence > 0.0
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn capability_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.capability_id.as_str()).collect()
    }
}

/// Free-form caller context forwarded to the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// When false, the planner always asks the reasoning service.
    #[serde(default = "default_true")]
    pub allow_reuse: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            notes: None,
            metadata: serde_json::Map::new(),
            allow_reuse: true,
        }
    }
}

impl RequestContext {
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Why a step did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Timeout,
    MissingParameter,
    CapabilityError,
    ValidationError,
    DependencySkipped,
    Cancelled,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Timeout => "timeout",
            FailureCategory::MissingParameter => "missing_parameter",
            FailureCategory::CapabilityError => "capability_error",
            FailureCategory::ValidationError => "validation_error",
            FailureCategory::DependencySkipped => "dependency_skipped",
            FailureCategory::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub category: FailureCategory,
    pub message: String,
}

/// One capability's share of a step: its retries collapsed into a single sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub capability_id: String,
    pub success: bool,
    pub attempts: u32,
    /// Latency of the last attempt.
    pub latency: Duration,
    pub failure: Option<FailureCategory>,
}

/// Recorded result of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    /// Capability that produced the final result (the fallback, if one ran).
    pub capability_id: String,
    pub status: StepStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<StepError>,
    pub attempts: u32,
    pub latency: Duration,
    pub used_fallback: bool,
    /// Primary first, then the fallback if one ran.
    #[serde(default)]
    pub invocations: Vec<Invocation>,
}

impl StepResult {
    pub fn skipped(step_id: &str, capability_id: &str, message: impl Into<String>) -> Self {
        Self::not_run(
            step_id,
            capability_id,
            StepStatus::Skipped,
            FailureCategory::DependencySkipped,
            message,
        )
    }

    /// A step that ended without any capability being invoked.
    pub fn not_run(
        step_id: &str,
        capability_id: &str,
        status: StepStatus,
        category: FailureCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.to_string(),
            capability_id: capability_id.to_string(),
            status,
            output: None,
            error: Some(StepError {
                category,
                message: message.into(),
            }),
            attempts: 0,
            latency: Duration::ZERO,
            used_fallback: false,
            invocations: Vec::new(),
        }
    }

    /// True when a capability was actually invoked for this step.
    pub fn was_executed(&self) -> bool {
        !self.invocations.is_empty()
    }

    pub fn category(&self) -> Option<FailureCategory> {
        self.error.as_ref().map(|e| e.category)
    }
}

/// One line of the failure manifest returned to the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub step_id: String,
    pub status: StepStatus,
    pub category: FailureCategory,
    pub message: String,
}

/// The recorded result of executing a plan. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub plan_id: String,
    pub per_step_results: Vec<StepResult>,
    pub overall_success: bool,
    /// Some steps succeeded while others did not.
    pub partial: bool,
    /// A plan-level timeout or cancellation cut execution short.
    pub aborted: bool,
    pub total_duration: Duration,
    /// Category of the first root failure, if any.
    pub error_taxonomy: Option<FailureCategory>,
    pub finished_at: DateTime<Utc>,
}

impl Outcome {
    /// Outcome for a plan that never ran (planning failed).
    pub fn not_executed(plan_id: &str, category: FailureCategory) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            per_step_results: Vec::new(),
            overall_success: false,
            partial: false,
            aborted: false,
            total_duration: Duration::ZERO,
            error_taxonomy: Some(category),
            finished_at: Utc::now(),
        }
    }

    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.per_step_results.iter().find(|r| r.step_id == step_id)
    }

    /// Every failed or skipped step and why.
    pub fn failures(&self) -> Vec<FailureEntry> {
        self.per_step_results
            .iter()
            .filter(|r| matches!(r.status, StepStatus::Failed | StepStatus::Skipped))
            .map(|r| {
                let (category, message) = r
                    .error
                    .as_ref()
                    .map(|e| (e.category, e.message.clone()))
                    .unwrap_or((FailureCategory::CapabilityError, "unknown error".into()));
                FailureEntry {
                    step_id: r.step_id.clone(),
                    status: r.status,
                    category,
                    message,
                }
            })
            .collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.per_step_results
            .iter()
            .filter(|r| r.status == StepStatus::Succeeded)
            .count()
    }
}

/// Real-time lifecycle events emitted while serving a request.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PlanReady {
        plan_id: String,
        steps: usize,
        origin: PlanOrigin,
        confidence: f64,
    },
    WaveStarted {
        plan_id: String,
        wave: usize,
        steps: Vec<String>,
    },
    StepFinished {
        plan_id: String,
        step_id: String,
        status: StepStatus,
        attempts: u32,
    },
    PlanFinished {
        plan_id: String,
        overall_success: bool,
        duration: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_clamped() {
        let mut plan = Plan::new("r", vec![Step::new("s1", "c")], PlanOrigin::Fresh);
        plan.set_confidence(1.7);
        assert_eq!(plan.confidence, 1.0);
        plan.set_confidence(-0.3);
        assert_eq!(plan.confidence, 0.0);
        plan.set_confidence(f64::NAN);
        assert_eq!(plan.confidence, 0.0);
        plan.set_confidence(0.42);
        assert!((plan.confidence - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_plan_zero_confidence() {
        let mut plan = Plan::new("r", vec![], PlanOrigin::Fresh);
        plan.set_confidence(0.9);
        assert_eq!(plan.confidence, 0.0);
        assert!(!plan.is_executable());
    }

    #[test]
    fn test_cannot_satisfy() {
        let plan = Plan::cannot_satisfy("do magic", "no capability can do magic", vec![]);
        assert!(plan.steps.is_empty());
        assert_eq!(plan.confidence, 0.0);
        assert_eq!(plan.explanation.as_deref(), Some("no capability can do magic"));
    }

    #[test]
    fn test_step_deserializes_with_defaults() {
        let step: Step = serde_json::from_value(json!({
            "step_id": "fetch",
            "capability_id": "fetch_page",
            "depends_on": ["a", "a", "b"]
        }))
        .unwrap();
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.depends_on.len(), 2);
        assert_eq!(step.parameters, json!({}));
    }

    #[test]
    fn test_failure_manifest() {
        let outcome = Outcome {
            plan_id: "p".into(),
            per_step_results: vec![
                StepResult {
                    step_id: "a".into(),
                    capability_id: "c".into(),
                    status: StepStatus::Failed,
                    output: None,
                    error: Some(StepError {
                        category: FailureCategory::Timeout,
                        message: "timed out".into(),
                    }),
                    attempts: 2,
                    latency: Duration::from_millis(10),
                    used_fallback: false,
                    invocations: vec![Invocation {
                        capability_id: "c".into(),
                        success: false,
                        attempts: 2,
                        latency: Duration::from_millis(5),
                        failure: Some(FailureCategory::Timeout),
                    }],
                },
                StepResult::skipped("b", "d", "upstream 'a' failed"),
            ],
            overall_success: false,
            partial: false,
            aborted: false,
            total_duration: Duration::from_millis(12),
            error_taxonomy: Some(FailureCategory::Timeout),
            finished_at: Utc::now(),
        };
        let failures = outcome.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].category, FailureCategory::Timeout);
        assert_eq!(failures[1].category, FailureCategory::DependencySkipped);
        assert!(outcome.result("a").unwrap().was_executed());
        assert!(!outcome.result("b").unwrap().was_executed());
    }

    #[test]
    fn test_failure_category_serde() {
        let v = serde_json::to_value(FailureCategory::MissingParameter).unwrap();
        assert_eq!(v, json!("missing_parameter"));
        assert_eq!(FailureCategory::Timeout.to_string(), "timeout");
    }
}

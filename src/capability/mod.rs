// src/capability/mod.rs — Capability descriptors and the invocation interface

pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use registry::{CapabilityRegistry, SearchHit};

/// Descriptor of a registered, invocable unit of work. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub description: String,
    #[serde(default = "empty_schema")]
    pub input_schema: serde_json::Value,
    #[serde(default = "empty_schema")]
    pub output_schema: serde_json::Value,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub performance_hint: PerformanceHint,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({"type": "object"})
}

impl Capability {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_schema: empty_schema(),
            output_schema: empty_schema(),
            category: String::new(),
            examples: Vec::new(),
            performance_hint: PerformanceHint::default(),
        }
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_examples(mut self, examples: Vec<String>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_hint(mut self, hint: PerformanceHint) -> Self {
        self.performance_hint = hint;
        self
    }

    /// Names listed under `input_schema.required`.
    pub fn required_inputs(&self) -> Vec<&str> {
        schema_required(&self.input_schema)
    }

    /// Names listed under `output_schema.properties`, or `None` when the schema declares none.
    pub fn declared_outputs(&self) -> Option<Vec<&str>> {
        self.output_schema
            .get("properties")
            .and_then(|v| v.as_object())
            .map(|props| props.keys().map(String::as_str).collect())
    }
}

pub(crate) fn schema_required(schema: &serde_json::Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default()
}

/// Static hints published by a provider; used before the ledger has samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHint {
    #[serde(default)]
    pub speed: Speed,
    /// Expected success probability in [0, 1].
    #[serde(default = "default_reliability")]
    pub reliability: f64,
    #[serde(default)]
    pub cost: Cost,
}

fn default_reliability() -> f64 {
    0.9
}

impl Default for PerformanceHint {
    fn default() -> Self {
        Self {
            speed: Speed::default(),
            reliability: default_reliability(),
            cost: Cost::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Fast,
    #[default]
    Medium,
    Slow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cost {
    #[default]
    Low,
    Medium,
    High,
}

/// Bounded retry with exponential backoff, applied per capability.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed), with deterministic jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_backoff.as_millis() as f64);
        let final_ms = capped_ms * deterministic_jitter(attempt, 0.2);
        Duration::from_millis(final_ms.max(0.0) as u64)
    }
}

/// Multiplier in [1 - fraction, 1 + fraction], reproducible for a given attempt.
pub(crate) fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

/// Per-invocation context handed to a provider.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub plan_id: String,
    pub step_id: String,
    /// Budget for this attempt. The executor enforces it as well.
    pub timeout: Duration,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Cancelled when the plan times out or the request is cancelled.
    pub cancel: CancellationToken,
}

/// Errors a provider may return from `invoke`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokeError {
    #[error("timed out")]
    Timeout,
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("{message}")]
    Failed { message: String, retriable: bool },
    #[error("cancelled")]
    Cancelled,
}

impl InvokeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retriable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retriable: true,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            InvokeError::Timeout
                | InvokeError::Failed {
                    retriable: true,
                    ..
                }
        )
    }
}

/// Implemented by every capability backend (fetchers, parsers, exporters, ...).
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn descriptor(&self) -> Capability;

    async fn invoke(
        &self,
        parameters: serde_json::Value,
        ctx: InvocationContext,
    ) -> Result<serde_json::Value, InvokeError>;
}

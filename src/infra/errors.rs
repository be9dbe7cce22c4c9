// src/infra/errors.rs — Error types for plancraft

use thiserror::Error;

use crate::planner::validate::ValidationIssue;

#[derive(Error, Debug)]
pub enum PlanCraftError {
    // Registry errors
    #[error("Capability '{id}' is already registered")]
    DuplicateCapability { id: String },

    #[error("Capability '{id}' not found")]
    CapabilityNotFound { id: String },

    // Planning errors (surfaced to the caller as "cannot satisfy")
    #[error("Planning failed: {reason}")]
    PlanningFailure { reason: String },

    #[error("Plan validation failed: {}", format_issues(.issues))]
    ValidationFailure { issues: Vec<ValidationIssue> },

    // Step errors
    #[error("Step '{step_id}' timed out after {after_ms}ms")]
    StepTimeout { step_id: String, after_ms: u64 },

    #[error("Step '{step_id}' failed: {message}")]
    StepExecution { step_id: String, message: String },

    #[error("Step '{step_id}' skipped: upstream '{cause}' did not succeed")]
    DependencySkipped { step_id: String, cause: String },

    // External services (retriable)
    #[error("Reasoning service '{provider}' error: {message}")]
    Reasoning {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Embedding service '{provider}' error: {message}")]
    Embedding { provider: String, message: String },

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlanCraftError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PlanCraftError::Reasoning {
                retriable: true,
                ..
            } | PlanCraftError::RateLimited { .. }
        )
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let err = PlanCraftError::Reasoning {
            provider: "test".into(),
            message: "HTTP 503".into(),
            retriable: true,
        };
        assert!(err.is_retriable());

        let err = PlanCraftError::RateLimited {
            provider: "test".into(),
            retry_after_ms: 100,
        };
        assert!(err.is_retriable());

        let err = PlanCraftError::PlanningFailure {
            reason: "no capabilities".into(),
        };
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_validation_failure_message_lists_issues() {
        let err = PlanCraftError::ValidationFailure {
            issues: vec![
                ValidationIssue::UnknownCapability {
                    step_id: "s1".into(),
                    capability_id: "nope".into(),
                },
                ValidationIssue::Cycle {
                    steps: vec!["a".into(), "b".into()],
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("nope"));
        assert!(msg.contains("a -> b"));
    }
}

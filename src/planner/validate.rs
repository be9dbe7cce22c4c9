// src/planner/validate.rs — Structural validation of candidate plans

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::entities::EntityKind;
use crate::capability::CapabilityRegistry;
use crate::core::graph;
use crate::core::params::collect_refs;
use crate::core::types::{FailureCategory, Step};

/// One reason a plan was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    NoSteps,
    MalformedOutput {
        reason: String,
    },
    UnknownCapability {
        step_id: String,
        capability_id: String,
    },
    DuplicateStep {
        step_id: String,
    },
    UnknownDependency {
        step_id: String,
        dependency: String,
    },
    Cycle {
        steps: Vec<String>,
    },
    ParametersNotObject {
        step_id: String,
    },
    MissingParameter {
        step_id: String,
        capability_id: String,
        parameter: String,
    },
    InvalidReference {
        step_id: String,
        target: String,
        path: String,
    },
    UnboundEntity {
        step_id: String,
        kind: EntityKind,
        index: usize,
    },
}

impl ValidationIssue {
    pub fn category(&self) -> FailureCategory {
        match self {
            ValidationIssue::MissingParameter { .. } | ValidationIssue::UnboundEntity { .. } => {
                FailureCategory::MissingParameter
            }
            _ => FailureCategory::ValidationError,
        }
    }

    /// Capability the issue should be charged to in the ledger, if any.
    pub fn capability_id(&self) -> Option<&str> {
        match self {
            ValidationIssue::MissingParameter { capability_id, .. } => Some(capability_id.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::NoSteps => write!(f, "plan has no steps"),
            ValidationIssue::MalformedOutput { reason } => {
                write!(f, "planner output was malformed: {reason}")
            }
            ValidationIssue::UnknownCapability {
                step_id,
                capability_id,
            } => write!(f, "step '{step_id}' uses unknown capability '{capability_id}'"),
            ValidationIssue::DuplicateStep { step_id } => {
                write!(f, "step id '{step_id}' is used more than once")
            }
            ValidationIssue::UnknownDependency {
                step_id,
                dependency,
            } => write!(f, "step '{step_id}' depends on unknown step '{dependency}'"),
            ValidationIssue::Cycle { steps } => {
                write!(f, "dependency cycle: {}", steps.join(" -> "))
            }
            ValidationIssue::ParametersNotObject { step_id } => {
                write!(f, "step '{step_id}' parameters must be a JSON object")
            }
            ValidationIssue::MissingParameter {
                step_id,
                capability_id,
                parameter,
            } => write!(
                f,
                "step '{step_id}' is missing required parameter '{parameter}' for '{capability_id}'"
            ),
            ValidationIssue::InvalidReference {
                step_id,
                target,
                path,
            } => write!(
                f,
                "step '{step_id}' references '{target}.{path}', which '{target}' does not output"
            ),
            ValidationIssue::UnboundEntity {
                step_id,
                kind,
                index,
            } => write!(
                f,
                "step '{step_id}' needs {kind} #{index}, which the request does not mention"
            ),
        }
    }
}

/// Validate `steps` against the registry.
///
/// References found in parameters are added to `depends_on` first, so the
/// cycle check and the executor both see them. Returns every issue found.
pub fn validate(steps: &mut [Step], registry: &CapabilityRegistry) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if steps.is_empty() {
        issues.push(ValidationIssue::NoSteps);
        return issues;
    }

    let mut seen = HashSet::new();
    for step in steps.iter() {
        if !seen.insert(step.step_id.as_str()) {
            issues.push(ValidationIssue::DuplicateStep {
                step_id: step.step_id.clone(),
            });
        }
    }
    let ids: HashSet<String> = steps.iter().map(|s| s.step_id.clone()).collect();

    for step in steps.iter_mut() {
        for r in collect_refs(&step.parameters) {
            step.depends_on.insert(r.step_id);
        }
        for dep in &step.depends_on {
            if !ids.contains(dep) {
                issues.push(ValidationIssue::UnknownDependency {
                    step_id: step.step_id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let capability_of: HashMap<&str, &str> = steps
        .iter()
        .map(|s| (s.step_id.as_str(), s.capability_id.as_str()))
        .collect();

    for step in steps.iter() {
        let capability = match registry.lookup(&step.capability_id) {
            Ok(c) => c,
            Err(_) => {
                issues.push(ValidationIssue::UnknownCapability {
                    step_id: step.step_id.clone(),
                    capability_id: step.capability_id.clone(),
                });
                continue;
            }
        };

        let Some(params) = step.parameters.as_object() else {
            issues.push(ValidationIssue::ParametersNotObject {
                step_id: step.step_id.clone(),
            });
            continue;
        };

        for required in capability.required_inputs() {
            let present = params.get(required).is_some_and(|v| !v.is_null());
            if !present {
                issues.push(ValidationIssue::MissingParameter {
                    step_id: step.step_id.clone(),
                    capability_id: step.capability_id.clone(),
                    parameter: required.to_string(),
                });
            }
        }

        for r in collect_refs(&step.parameters) {
            let (Some(field), Some(upstream_cap)) =
                (r.root_field(), capability_of.get(r.step_id.as_str()))
            else {
                continue;
            };
            let Ok(upstream) = registry.lookup(upstream_cap) else {
                continue;
            };
            if let Some(outputs) = upstream.declared_outputs() {
                if !outputs.contains(&field) {
                    issues.push(ValidationIssue::InvalidReference {
                        step_id: step.step_id.clone(),
                        target: r.step_id.clone(),
                        path: r.path.clone().unwrap_or_default(),
                    });
                }
            }
        }
    }

    let structural_ok = !issues.iter().any(|i| {
        matches!(
            i,
            ValidationIssue::DuplicateStep { .. } | ValidationIssue::UnknownDependency { .. }
        )
    });
    if structural_ok {
        if let Err(cycle) = graph::waves(steps) {
            issues.push(ValidationIssue::Cycle { steps: cycle });
        }
    }

    issues
}

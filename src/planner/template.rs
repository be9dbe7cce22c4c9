// src/planner/template.rs — Generalize plans into reusable templates and rebind them

use serde_json::Value;

use super::entities::Entities;
use super::validate::ValidationIssue;
use crate::core::params::{as_entity, as_ref, make_entity, try_map};
use crate::core::types::{Step, StepStatus};

/// Replace literal parameter values that came from the request with entity placeholders.
pub fn generalize(steps: &[Step], entities: &Entities) -> Vec<Step> {
    steps
        .iter()
        .map(|step| {
            let parameters: Result<Value, std::convert::Infallible> =
                try_map(&step.parameters, &mut |node| {
                    if as_ref(node).is_some() {
                        return Ok(Some(node.clone()));
                    }
                    Ok(node
                        .as_str()
                        .and_then(|s| entities.find(s))
                        .map(|(kind, index)| make_entity(kind, index)))
                });
            Step {
                parameters: parameters.unwrap_or_else(|never| match never {}),
                status: StepStatus::Pending,
                ..step.clone()
            }
        })
        .collect()
}

/// Fill entity placeholders from the new request. Fails on the first placeholder
/// with no matching entity.
pub fn rebind(template: &[Step], entities: &Entities) -> Result<Vec<Step>, ValidationIssue> {
    template
        .iter()
        .map(|step| {
            let parameters = try_map(&step.parameters, &mut |node| {
                let Some((kind, index)) = as_entity(node) else {
                    return Ok(None);
                };
                match entities.get(kind, index) {
                    Some(value) => Ok(Some(Value::String(value.to_string()))),
                    None => Err(ValidationIssue::UnboundEntity {
                        step_id: step.step_id.clone(),
                        kind,
                        index,
                    }),
                }
            })?;
            Ok(Step {
                parameters,
                status: StepStatus::Pending,
                ..step.clone()
            })
        })
        .collect()
}

// src/executor/resolve.rs — Substitute upstream outputs into step parameters

use serde_json::Value;
use std::collections::HashMap;

use crate::core::params::{as_entity, as_ref, lookup_path, try_map};
use crate::planner::entities::EntityKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("no output recorded for step '{step_id}'")]
    MissingOutput { step_id: String },
    #[error("output of '{step_id}' has no value at '{path}'")]
    MissingPath { step_id: String, path: String },
    #[error("placeholder for {kind} #{index} was never bound")]
    UnboundEntity { kind: EntityKind, index: usize },
}

/// Replace every `$ref` in `params` with the referenced output.
pub fn resolve(params: &Value, outputs: &HashMap<String, Value>) -> Result<Value, ResolveError> {
    try_map(params, &mut |node| {
        if let Some((kind, index)) = as_entity(node) {
            return Err(ResolveError::UnboundEntity { kind, index });
        }
        let Some(r) = as_ref(node) else {
            return Ok(None);
        };
        let output = outputs
            .get(&r.step_id)
            .ok_or_else(|| ResolveError::MissingOutput {
                step_id: r.step_id.clone(),
            })?;
        match &r.path {
            None => Ok(Some(output.clone())),
            Some(path) => lookup_path(output, path)
                .cloned()
                .map(Some)
                .ok_or_else(|| ResolveError::MissingPath {
                    step_id: r.step_id.clone(),
                    path: path.clone(),
                }),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn outputs() -> HashMap<String, Value> {
        HashMap::from([(
            "fetch".to_string(),
            json!({"html": "<h1>Hi</h1>", "meta": {"status": 200}}),
        )])
    }

    #[test]
    fn test_resolves_paths_and_whole_outputs() {
        let params = json!({
            "html": {"$ref": "fetch", "path": "html"},
            "status": {"$ref": "fetch", "path": "meta.status"},
            "all": {"$ref": "fetch"},
            "literal": [1, 2]
        });
        let resolved = resolve(&params, &outputs()).unwrap();
        assert_eq!(
            resolved,
            json!({
                "html": "<h1>Hi</h1>",
                "status": 200,
                "all": {"html": "<h1>Hi</h1>", "meta": {"status": 200}},
                "literal": [1, 2]
            })
        );
    }

    #[test]
    fn test_missing_path() {
        let params = json!({"x": {"$ref": "fetch", "path": "body"}});
        assert_eq!(
            resolve(&params, &outputs()).unwrap_err(),
            ResolveError::MissingPath {
                step_id: "fetch".into(),
                path: "body".into()
            }
        );
    }

    #[test]
    fn test_missing_output() {
        let params = json!({"x": {"$ref": "ghost"}});
        assert!(matches!(
            resolve(&params, &outputs()),
            Err(ResolveError::MissingOutput { .. })
        ));
    }

    #[test]
    fn test_unbound_entity() {
        let params = json!({"url": {"$entity": "url", "index": 0}});
        assert_eq!(
            resolve(&params, &outputs()).unwrap_err(),
            ResolveError::UnboundEntity {
                kind: EntityKind::Url,
                index: 0
            }
        );
    }
}

// src/core/params.rs — Parameter references and entity placeholders
//
// `{"$ref": "<step_id>", "path": "a.b.0"}` stands for an upstream step's output.
// `{"$entity": "<kind>", "index": n}` stands for the n-th entity of that kind in the request.

use serde_json::{json, Map, Value};

use crate::planner::entities::EntityKind;

pub const REF_KEY: &str = "$ref";
pub const PATH_KEY: &str = "path";
pub const ENTITY_KEY: &str = "$entity";
pub const INDEX_KEY: &str = "index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRef {
    pub step_id: String,
    pub path: Option<String>,
}

impl ParamRef {
    /// First path segment, which names an output field of the upstream step.
    pub fn root_field(&self) -> Option<&str> {
        self.path
            .as_deref()
            .and_then(|p| p.split('.').next())
            .filter(|s| !s.is_empty())
    }
}

pub fn make_ref(step_id: &str, path: Option<&str>) -> Value {
    match path {
        Some(p) => json!({ REF_KEY: step_id, PATH_KEY: p }),
        None => json!({ REF_KEY: step_id }),
    }
}

pub fn make_entity(kind: EntityKind, index: usize) -> Value {
    json!({ ENTITY_KEY: kind, INDEX_KEY: index })
}

/// Interpret a value as a reference, if it is one.
pub fn as_ref(value: &Value) -> Option<ParamRef> {
    let obj = value.as_object()?;
    let step_id = obj.get(REF_KEY)?.as_str()?;
    if obj.keys().any(|k| k != REF_KEY && k != PATH_KEY) {
        return None;
    }
    let path = obj
        .get(PATH_KEY)
        .and_then(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    Some(ParamRef {
        step_id: step_id.to_string(),
        path,
    })
}

/// Interpret a value as an entity placeholder, if it is one.
pub fn as_entity(value: &Value) -> Option<(EntityKind, usize)> {
    let obj = value.as_object()?;
    let kind: EntityKind = serde_json::from_value(obj.get(ENTITY_KEY)?.clone()).ok()?;
    let index = obj.get(INDEX_KEY).and_then(|i| i.as_u64()).unwrap_or(0) as usize;
    Some((kind, index))
}

/// Every reference anywhere inside `value`.
pub fn collect_refs(value: &Value) -> Vec<ParamRef> {
    let mut out = Vec::new();
    walk_refs(value, &mut out);
    out
}

fn walk_refs(value: &Value, out: &mut Vec<ParamRef>) {
    if let Some(r) = as_ref(value) {
        out.push(r);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|v| walk_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| walk_refs(v, out)),
        _ => {}
    }
}

/// Rebuild `value`, giving `f` the first chance to replace each node.
/// Nodes `f` returns `Ok(None)` for are recursed into.
pub fn try_map<E, F>(value: &Value, f: &mut F) -> Result<Value, E>
where
    F: FnMut(&Value) -> Result<Option<Value>, E>,
{
    if let Some(replaced) = f(value)? {
        return Ok(replaced);
    }
    Ok(match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| try_map(v, f))
                .collect::<Result<Vec<_>, E>>()?,
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), try_map(v, f)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

/// Navigate a dot path (`items.0.title`) into a value.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_roundtrip() {
        let v = make_ref("fetch", Some("html"));
        assert_eq!(
            as_ref(&v),
            Some(ParamRef {
                step_id: "fetch".into(),
                path: Some("html".into())
            })
        );
        assert_eq!(as_ref(&make_ref("fetch", None)).unwrap().path, None);
    }

    #[test]
    fn test_object_with_extra_keys_is_not_a_ref() {
        let v = json!({"$ref": "a", "other": 1});
        assert!(as_ref(&v).is_none());
    }

    #[test]
    fn test_collect_nested_refs() {
        let params = json!({
            "html": {"$ref": "fetch", "path": "body"},
            "extra": [{"$ref": "meta"}, "literal"],
            "nested": {"deep": {"$ref": "other", "path": "x.y"}}
        });
        let mut ids: Vec<String> = collect_refs(&params).into_iter().map(|r| r.step_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["fetch", "meta", "other"]);
    }

    #[test]
    fn test_root_field() {
        let r = as_ref(&make_ref("s", Some("items.0.title"))).unwrap();
        assert_eq!(r.root_field(), Some("items"));
    }

    #[test]
    fn test_entity_placeholder() {
        let v = make_entity(EntityKind::Url, 1);
        assert_eq!(as_entity(&v), Some((EntityKind::Url, 1)));
        assert!(as_entity(&json!({"$entity": "planet"})).is_none());
    }

    #[test]
    fn test_lookup_path() {
        let v = json!({"items": [{"title": "a"}, {"title": "b"}], "count": 2});
        assert_eq!(lookup_path(&v, "items.1.title"), Some(&json!("b")));
        assert_eq!(lookup_path(&v, "count"), Some(&json!(2)));
        assert!(lookup_path(&v, "items.5").is_none());
        assert!(lookup_path(&v, "missing").is_none());
    }

    #[test]
    fn test_try_map_replaces_and_recurses() {
        let v = json!({"a": "x", "b": ["x", "y"]});
        let out: Result<Value, ()> = try_map(&v, &mut |node| {
            Ok((node == &json!("x")).then(|| json!("X")))
        });
        assert_eq!(out.unwrap(), json!({"a": "X", "b": ["X", "y"]}));
    }
}

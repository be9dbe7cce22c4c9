// src/planner/prompt.rs — Planning prompt, output schema and oracle response parsing

use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::validate::ValidationIssue;
use crate::capability::Capability;
use crate::core::types::{RequestContext, Step};
use crate::infra::errors::PlanCraftError;
use crate::memory::PatternMatch;

const PLAN_PROMPT: &str = r#"Plan how to satisfy this data-extraction request using only the capabilities listed below.

Request:
{{ request }}
{% if notes %}
Caller notes:
{{ notes }}
{% endif %}{% if metadata %}
Caller context:
{{ metadata }}
{% endif %}
Capability catalog:
{% for cap in catalog -%}
- {{ cap.id }}: {{ cap.description }}
  reliability: {{ cap.reliability }}
  inputs: {{ cap.inputs }}{% if cap.required %} (required: {{ cap.required }}){% endif %}
  outputs: {{ cap.outputs }}
{% endfor %}
{% if hint -%}
A similar past request ("{{ hint.request }}", similarity {{ hint.similarity }}) was solved with:
{{ hint.steps }}
Adapt it only where it fits this request.
{% endif %}
Rules:
1) Each step has a unique step_id and a capability_id from the catalog.
2) Parameters must include every required input of the capability.
3) To pass an upstream output, use {"$ref": "<step_id>", "path": "<output field>"} as the parameter value.
4) List upstream step ids in depends_on. The steps must form an acyclic graph.
5) Set certainty between 0 and 1 to say how sure you are the plan satisfies the request.
6) When several capabilities fit, prefer the one with higher reliability.
7) If no combination of capabilities can satisfy the request, return no steps and say why in explanation.
{% if issues %}
Your previous answer was rejected:
{% for issue in issues -%}
- {{ issue }}
{% endfor -%}
Previous answer:
{{ previous }}
Fix every issue and answer again.
{% endif %}"#;

/// Everything that goes into one planning prompt.
pub struct PromptInput<'a> {
    pub request: &'a str,
    pub context: &'a RequestContext,
    pub catalog: &'a [CatalogItem],
    pub hint: Option<&'a PatternMatch>,
    pub issues: &'a [ValidationIssue],
    pub previous: Option<&'a serde_json::Value>,
}

/// A capability offered to the reasoning service, with its observed reliability.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub capability: Capability,
    pub reliability: f64,
}

#[derive(Serialize)]
struct CatalogEntry<'a> {
    id: &'a str,
    description: &'a str,
    reliability: String,
    inputs: String,
    required: String,
    outputs: String,
}

pub fn render(input: &PromptInput<'_>) -> Result<String, PlanCraftError> {
    let mut env = Environment::new();
    env.add_template("plan", PLAN_PROMPT)
        .map_err(|e| PlanCraftError::PlanningFailure {
            reason: format!("prompt template: {e}"),
        })?;
    let template = env
        .get_template("plan")
        .map_err(|e| PlanCraftError::PlanningFailure {
            reason: format!("prompt template: {e}"),
        })?;

    let catalog: Vec<CatalogEntry<'_>> = input
        .catalog
        .iter()
        .map(|item| {
            let cap = &item.capability;
            CatalogEntry {
                id: &cap.id,
                description: &cap.description,
                reliability: format!("{:.2}", item.reliability),
                inputs: describe_fields(&cap.input_schema),
                required: cap.required_inputs().join(", "),
                outputs: describe_fields(&cap.output_schema),
            }
        })
        .collect();

    let hint = input.hint.map(|m| {
        context! {
            request => m.pattern.request_text,
            similarity => format!("{:.2}", m.similarity),
            steps => serde_json::to_string(&m.pattern.plan_template).unwrap_or_default(),
        }
    });
    let issues: Vec<String> = input.issues.iter().map(|i| i.to_string()).collect();
    let metadata = if input.context.metadata.is_empty() {
        None
    } else {
        serde_json::to_string_pretty(&input.context.metadata).ok()
    };
    let previous = input
        .previous
        .map(|v| serde_json::to_string(v).unwrap_or_default());

    template
        .render(context! {
            request => input.request,
            notes => input.context.notes,
            metadata => metadata,
            catalog => catalog,
            hint => hint,
            issues => issues,
            previous => previous,
        })
        .map_err(|e| PlanCraftError::PlanningFailure {
            reason: format!("prompt render: {e}"),
        })
}

/// `name: type, ...` for a JSON object schema.
fn describe_fields(schema: &serde_json::Value) -> String {
    let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
        return "any".to_string();
    };
    if props.is_empty() {
        return "none".to_string();
    }
    props
        .iter()
        .map(|(name, s)| format!("{name}: {}", schema_type_hint(s)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn schema_type_hint(schema: &serde_json::Value) -> String {
    if let Some(t) = schema.get("type") {
        if let Some(text) = t.as_str() {
            return text.to_string();
        }
        if let Some(list) = t.as_array() {
            let mut items = list
                .iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect::<Vec<_>>();
            if !items.is_empty() {
                items.sort_unstable();
                return items.join("|");
            }
        }
    }
    if schema.get("enum").is_some() {
        return "enum".to_string();
    }
    "any".to_string()
}

/// JSON schema the reasoning service must answer with.
pub fn output_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "step_id": {"type": "string"},
                        "capability_id": {"type": "string"},
                        "parameters": {"type": "object"},
                        "depends_on": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["step_id", "capability_id", "parameters"]
                }
            },
            "certainty": {"type": "number", "minimum": 0, "maximum": 1},
            "explanation": {"type": "string"}
        },
        "required": ["steps"]
    })
}

/// The reasoning service's candidate plan.
#[derive(Debug, Clone, Deserialize)]
pub struct OraclePlan {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub certainty: Option<f64>,
    #[serde(default)]
    pub explanation: Option<String>,
}

pub fn parse_oracle_plan(value: serde_json::Value) -> Result<OraclePlan, ValidationIssue> {
    let mut plan: OraclePlan =
        serde_json::from_value(value).map_err(|e| ValidationIssue::MalformedOutput {
            reason: e.to_string(),
        })?;
    for step in &mut plan.steps {
        step.status = Default::default();
        if step.parameters.is_null() {
            step.parameters = json!({});
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Pattern;

    fn catalog() -> Vec<CatalogItem> {
        vec![CatalogItem {
            capability: fetch_page(),
            reliability: 0.85,
        }]
    }

    fn fetch_page() -> Capability {
        Capability::new("fetch_page", "Fetch a web page")
            .with_input_schema(json!({
                "type": "object",
                "properties": {"url": {"type": "string"}},
                "required": ["url"]
            }))
            .with_output_schema(json!({
                "type": "object",
                "properties": {"html": {"type": "string"}}
            }))
    }

    #[test]
    fn test_render_lists_catalog() {
        let ctx = RequestContext::default().with_notes("be quick");
        let caps = catalog();
        let prompt = render(&PromptInput {
            request: "get titles from example.com",
            context: &ctx,
            catalog: &caps,
            hint: None,
            issues: &[],
            previous: None,
        })
        .unwrap();
        assert!(prompt.contains("get titles from example.com"));
        assert!(prompt.contains("- fetch_page: Fetch a web page"));
        assert!(prompt.contains("inputs: url: string (required: url)"));
        assert!(prompt.contains("outputs: html: string"));
        assert!(prompt.contains("be quick"));
        assert!(prompt.contains("reliability: 0.85"));
        assert!(!prompt.contains("rejected"));
        assert!(!prompt.contains("Caller context"));
    }

    #[test]
    fn test_render_forwards_caller_metadata() {
        let mut ctx = RequestContext::default();
        ctx.metadata.insert("locale".into(), json!("de-DE"));
        ctx.metadata.insert("max_pages".into(), json!(3));
        let caps = catalog();
        let prompt = render(&PromptInput {
            request: "r",
            context: &ctx,
            catalog: &caps,
            hint: None,
            issues: &[],
            previous: None,
        })
        .unwrap();
        assert!(prompt.contains("Caller context:"));
        assert!(prompt.contains(r#""locale": "de-DE""#));
        assert!(prompt.contains(r#""max_pages": 3"#));
    }

    #[test]
    fn test_render_includes_hint_and_issues() {
        let caps = catalog();
        let hint = PatternMatch {
            pattern: Pattern::new("scrape titles from shop.com", vec![1.0], vec![]),
            similarity: 0.81,
        };
        let issues = vec![ValidationIssue::NoSteps];
        let previous = json!({"steps": []});
        let prompt = render(&PromptInput {
            request: "r",
            context: &RequestContext::default(),
            catalog: &caps,
            hint: Some(&hint),
            issues: &issues,
            previous: Some(&previous),
        })
        .unwrap();
        assert!(prompt.contains("similarity 0.81"));
        assert!(prompt.contains("scrape titles from shop.com"));
        assert!(prompt.contains("- plan has no steps"));
        assert!(prompt.contains(r#"{"steps":[]}"#));
    }

    #[test]
    fn test_parse_oracle_plan() {
        let plan = parse_oracle_plan(json!({
            "steps": [{"step_id": "a", "capability_id": "fetch_page", "parameters": null, "status": "succeeded"}],
            "certainty": 0.8
        }))
        .unwrap();
        assert_eq!(plan.steps[0].parameters, json!({}));
        assert_eq!(plan.steps[0].status, crate::core::types::StepStatus::Pending);
        assert_eq!(plan.certainty, Some(0.8));
    }

    #[test]
    fn test_parse_malformed() {
        let err = parse_oracle_plan(json!({"plan": "nope"})).unwrap_err();
        assert!(matches!(err, ValidationIssue::MalformedOutput { .. }));
    }

    #[test]
    fn test_schema_requires_steps() {
        assert_eq!(output_schema()["required"], json!(["steps"]));
    }
}

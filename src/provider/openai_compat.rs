// src/provider/openai_compat.rs — OpenAI-compatible reasoning and embedding clients
//
// Works against any `/chat/completions` endpoint that honours
// `response_format: json_schema` (OpenAI, Groq, vLLM, Ollama, ...).
// Models that ignore the schema and wrap JSON in prose are handled by `extract_json`.

use async_trait::async_trait;
use std::time::Duration;

use super::{EmbeddingService, ReasoningService};
use crate::infra::errors::PlanCraftError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAICompatReasoner {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAICompatReasoner {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, prompt: &str, output_schema: &serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": "You are a planning engine. Reply with JSON only."},
                {"role": "user", "content": prompt},
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {"name": "plan", "schema": output_schema, "strict": false},
            },
        })
    }
}

#[async_trait]
impl ReasoningService for OpenAICompatReasoner {
    fn id(&self) -> &str {
        "openai_compat"
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        output_schema: &serde_json::Value,
    ) -> Result<serde_json::Value, PlanCraftError> {
        let body = self.request_body(prompt, output_schema);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header(
                "User-Agent",
                format!("plancraft/{}", env!("CARGO_PKG_VERSION")),
            )
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlanCraftError::Reasoning {
                provider: self.id().into(),
                message: e.to_string(),
                retriable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(0);
            let error_body = response.text().await.unwrap_or_default();
            return Err(classify_status(self.id(), status.as_u16(), error_body, retry_after_ms));
        }

        let resp: serde_json::Value =
            response.json().await.map_err(|e| PlanCraftError::Reasoning {
                provider: self.id().into(),
                message: e.to_string(),
                retriable: false,
            })?;

        let content = resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        parse_structured(content).ok_or_else(|| PlanCraftError::Reasoning {
            provider: self.id().into(),
            message: "response did not contain a JSON object".into(),
            retriable: false,
        })
    }
}

/// Map an HTTP failure status to an error with the right retry classification.
fn classify_status(provider: &str, status: u16, body: String, retry_after_ms: u64) -> PlanCraftError {
    match status {
        429 => PlanCraftError::RateLimited {
            provider: provider.into(),
            retry_after_ms,
        },
        500..=599 => PlanCraftError::Reasoning {
            provider: provider.into(),
            message: format!("HTTP {status}: {body}"),
            retriable: true,
        },
        _ => PlanCraftError::Reasoning {
            provider: provider.into(),
            message: format!("HTTP {status}: {body}"),
            retriable: false,
        },
    }
}

/// Parse model output as JSON, falling back to the outermost `{...}` span.
pub fn parse_structured(content: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(content.trim()) {
        if v.is_object() {
            return Some(v);
        }
    }
    let extracted = extract_json(content)?;
    serde_json::from_str::<serde_json::Value>(&extracted)
        .ok()
        .filter(|v| v.is_object())
}

fn extract_json(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

/// `/embeddings` client.
pub struct OpenAIEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(api_key: String, base_url: String, model: String, dimensions: usize) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimensions,
            client: reqwest::Client::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> PlanCraftError {
        PlanCraftError::Embedding {
            provider: "openai".into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl EmbeddingService for OpenAIEmbedder {
    fn id(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PlanCraftError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
            "dimensions": self.dimensions,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.error(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("HTTP {status}: {body}")));
        }

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.error(format!("Failed to parse embedding response: {e}")))?;

        let embedding: Vec<f32> = resp["data"][0]["embedding"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect()
            })
            .unwrap_or_default();

        if embedding.len() != self.dimensions {
            return Err(self.error(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }
}

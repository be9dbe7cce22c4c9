// tests/common/mod.rs — Mock services shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use plancraft::capability::{
    Capability, CapabilityProvider, CapabilityRegistry, InvocationContext, InvokeError, RetryPolicy,
};
use plancraft::core::engine::Engine;
use plancraft::infra::config::{Config, LearningMode};
use plancraft::infra::errors::PlanCraftError;
use plancraft::memory::SharedStore;
use plancraft::provider::embedder::HashingEmbedder;
use plancraft::provider::ReasoningService;

/// Reasoner that replays canned answers in order, repeating the last one.
pub struct ScriptedReasoner {
    answers: Mutex<VecDeque<Value>>,
    last: Mutex<Option<Value>>,
    delay: Duration,
    pub calls: AtomicU32,
}

impl ScriptedReasoner {
    pub fn new(answers: Vec<Value>) -> Arc<Self> {
        Self::slow(answers, Duration::ZERO)
    }

    pub fn slow(answers: Vec<Value>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            last: Mutex::new(None),
            delay,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn generate_structured(
        &self,
        _prompt: &str,
        _output_schema: &Value,
    ) -> Result<Value, PlanCraftError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.answers.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(v) = next {
            *last = Some(v);
        }
        last.clone().ok_or_else(|| PlanCraftError::Reasoning {
            provider: "scripted".into(),
            message: "no answer scripted".into(),
            retriable: false,
        })
    }
}

type Behavior = dyn Fn(&Value, &InvocationContext) -> Result<Value, InvokeError> + Send + Sync;

/// Capability with a scripted body. Tracks calls, concurrency and timing.
pub struct MockCapability {
    descriptor: Capability,
    delay: Duration,
    behavior: Box<Behavior>,
    pub calls: AtomicU32,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub spans: Mutex<Vec<(Instant, Instant)>>,
}

impl MockCapability {
    pub fn new(
        descriptor: Capability,
        behavior: impl Fn(&Value, &InvocationContext) -> Result<Value, InvokeError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            descriptor,
            delay: Duration::ZERO,
            behavior: Box::new(behavior),
            calls: AtomicU32::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            spans: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn first_span(&self) -> Option<(Instant, Instant)> {
        self.spans.lock().unwrap().first().copied()
    }
}

#[async_trait]
impl CapabilityProvider for MockCapability {
    fn descriptor(&self) -> Capability {
        self.descriptor.clone()
    }

    async fn invoke(&self, parameters: Value, ctx: InvocationContext) -> Result<Value, InvokeError> {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.behavior)(&parameters, &ctx);

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.spans.lock().unwrap().push((started, Instant::now()));
        result
    }
}

pub fn fetch_descriptor() -> Capability {
    Capability::new("fetch_page", "Download the HTML of a web page")
        .with_category("fetch")
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

pub fn extract_descriptor() -> Capability {
    Capability::new("extract_emails", "Find email addresses in HTML")
        .with_category("extract")
        .with_input_schema(json!({
            "type": "object",
            "properties": {"html": {"type": "string"}},
            "required": ["html"]
        }))
        .with_output_schema(json!({
            "type": "object",
            "properties": {"emails": {"type": "array"}}
        }))
}

pub fn export_descriptor() -> Capability {
    Capability::new("export_csv", "Write rows to a CSV file")
        .with_category("export")
        .with_input_schema(json!({
            "type": "object",
            "properties": {"rows": {"type": "array"}},
            "required": ["rows"]
        }))
}

/// Fetch returns canned HTML for the requested URL.
pub fn fetch_page() -> Arc<MockCapability> {
    Arc::new(MockCapability::new(fetch_descriptor(), |params, _| {
        let url = params["url"].as_str().unwrap_or_default();
        Ok(json!({"html": format!("<p>contact: info@{}</p>", url.trim_start_matches("https://"))}))
    }))
}

/// Extract pulls anything that looks like an email out of the HTML.
pub fn extract_emails() -> Arc<MockCapability> {
    Arc::new(MockCapability::new(extract_descriptor(), |params, _| {
        let html = params["html"].as_str().unwrap_or_default();
        let emails: Vec<&str> = html
            .split(|c: char| c.is_whitespace() || c == '<' || c == '>')
            .filter(|w| w.contains('@'))
            .collect();
        Ok(json!({"emails": emails}))
    }))
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        backoff_factor: 1.0,
        max_backoff: Duration::from_millis(2),
    }
}

pub fn registry_with(providers: &[Arc<MockCapability>]) -> Arc<CapabilityRegistry> {
    let reg = CapabilityRegistry::with_default_retry(fast_retry(0));
    for p in providers {
        reg.register(p.clone()).unwrap();
    }
    Arc::new(reg)
}

/// The fetch -> extract plan the oracle proposes for an email request.
pub fn fetch_extract_answer(url: &str) -> Value {
    json!({
        "steps": [
            {"step_id": "s1", "capability_id": "fetch_page", "parameters": {"url": url}},
            {"step_id": "s2", "capability_id": "extract_emails",
             "parameters": {"html": {"$ref": "s1", "path": "html"}}}
        ],
        "certainty": 0.9,
        "explanation": "fetch the page, then extract emails"
    })
}

pub fn test_config(mode: LearningMode) -> Config {
    let mut config = Config::default();
    config.learning.mode = mode;
    config.embedding.dimensions = 128;
    config.executor.default_timeout_ms = 2_000;
    config.executor.timeout_floor_ms = 50;
    config
}

pub fn engine(
    registry: Arc<CapabilityRegistry>,
    reasoner: Arc<ScriptedReasoner>,
    store: Option<SharedStore>,
    config: &Config,
) -> Engine {
    Engine::new(
        registry,
        reasoner,
        Arc::new(HashingEmbedder::new(config.embedding.dimensions)),
        store,
        config,
    )
    .unwrap()
}

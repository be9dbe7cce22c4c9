// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::RetryPolicy;
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4.1-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.1,
            max_tokens: 2048,
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff settings, shared by the reasoning client and capability retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 250,
            backoff_factor: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_delay_ms),
            backoff_factor: self.backoff_factor,
            max_backoff: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Offline feature-hashing embedder.
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint (uses the `[reasoning]` base_url and key).
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hashing,
            model: "text-embedding-3-small".into(),
            dimensions: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub top_k: usize,
    /// Minimum similarity for reusing a stored plan verbatim.
    pub reuse_threshold: f32,
    /// Minimum similarity for passing a stored plan to the oracle as a hint.
    pub weak_prior_threshold: f32,
    /// Subtracted from the pattern's success rate when a plan is adapted.
    pub adaptation_penalty: f64,
    /// Maximum capabilities included in the catalog sent to the reasoning service.
    pub catalog_size: usize,
    /// Ledger samples needed before observed reliability replaces the descriptor hint.
    pub min_reliability_samples: u64,
    /// Capabilities less reliable than this are listed last in the catalog.
    pub reliability_floor: f64,
    /// Re-prompts allowed after a validation failure.
    pub repair_attempts: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            reuse_threshold: 0.9,
            weak_prior_threshold: 0.75,
            adaptation_penalty: 0.05,
            catalog_size: 12,
            min_reliability_samples: 3,
            reliability_floor: 0.5,
            repair_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_parallel_per_plan: usize,
    /// Cap on simultaneous capability invocations across all requests.
    pub global_max_concurrent: usize,
    pub default_timeout_ms: u64,
    pub timeout_multiplier: f64,
    pub timeout_floor_ms: u64,
    pub timeout_ceiling_ms: u64,
    pub plan_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel_per_plan: 4,
            global_max_concurrent: 16,
            default_timeout_ms: 30_000,
            timeout_multiplier: 3.0,
            timeout_floor_ms: 1_000,
            timeout_ceiling_ms: 120_000,
            plan_timeout_secs: 300,
            retry: RetryConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            default: Duration::from_millis(self.default_timeout_ms),
            multiplier: self.timeout_multiplier,
            floor: Duration::from_millis(self.timeout_floor_ms),
            ceiling: Duration::from_millis(self.timeout_ceiling_ms),
        }
    }
}

/// Parameters for adaptive per-capability timeouts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    pub default: Duration,
    pub multiplier: f64,
    pub floor: Duration,
    pub ceiling: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    /// Outcomes go through the bounded queue and are ingested in the background.
    Deferred,
    /// Outcomes are ingested before `submit_request` returns.
    Inline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    DropOldest,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub mode: LearningMode,
    pub learning_threshold: f64,
    pub merge_threshold: f32,
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
    pub retention_days: u32,
    pub ema_alpha: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            mode: LearningMode::Deferred,
            learning_threshold: 0.6,
            merge_threshold: 0.95,
            queue_capacity: 256,
            backpressure: Backpressure::DropOldest,
            retention_days: 90,
            ema_alpha: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Overrides the default database location.
    pub db_path: Option<PathBuf>,
}

impl MemoryConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(paths::db_path)
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make thresholds meaningless.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.planner;
        if !(0.0..=1.0).contains(&p.reuse_threshold) {
            anyhow::bail!("planner.reuse_threshold must be within [0, 1]");
        }
        if p.weak_prior_threshold > p.reuse_threshold {
            anyhow::bail!("planner.weak_prior_threshold must not exceed reuse_threshold");
        }
        if !(0.0..=1.0).contains(&p.reliability_floor) {
            anyhow::bail!("planner.reliability_floor must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&p.adaptation_penalty) {
            anyhow::bail!("planner.adaptation_penalty must be within [0, 1]");
        }
        if self.executor.max_parallel_per_plan == 0 || self.executor.global_max_concurrent == 0 {
            anyhow::bail!("executor concurrency limits must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.learning.ema_alpha) || self.learning.ema_alpha == 0.0 {
            anyhow::bail!("learning.ema_alpha must be within (0, 1]");
        }
        if self.learning.queue_capacity == 0 {
            anyhow::bail!("learning.queue_capacity must be at least 1");
        }
        if self.embedding.dimensions == 0 {
            anyhow::bail!("embedding.dimensions must be at least 1");
        }
        Ok(())
    }
}

// src/provider/retry.rs — Retry with exponential backoff for the reasoning service
//
// Retries rate limits and errors flagged retriable (5xx, timeouts, connection resets).
// Bad requests, auth failures and unparseable output are returned immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::ReasoningService;
use crate::capability::RetryPolicy;
use crate::infra::errors::PlanCraftError;

/// Wraps a reasoner and retries `generate_structured` on transient errors.
pub struct RetryReasoner {
    inner: Arc<dyn ReasoningService>,
    policy: RetryPolicy,
}

impl RetryReasoner {
    pub fn new(inner: Arc<dyn ReasoningService>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(inner: Arc<dyn ReasoningService>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Delay for a given retry attempt (0-indexed). A server-supplied hint wins.
    fn delay_for_attempt(&self, attempt: u32, rate_limit_delay: Option<Duration>) -> Duration {
        if let Some(rl_delay) = rate_limit_delay {
            return rl_delay + Duration::from_millis(100);
        }
        self.policy.backoff_for(attempt)
    }
}

fn rate_limit_delay(error: &PlanCraftError) -> Option<Duration> {
    match error {
        PlanCraftError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

#[async_trait]
impl ReasoningService for RetryReasoner {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        output_schema: &serde_json::Value,
    ) -> Result<serde_json::Value, PlanCraftError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate_structured(prompt, output_schema).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !e.is_retriable() || attempt >= self.policy.max_retries {
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt, rate_limit_delay(&e));
                    tracing::warn!(
                        provider = self.inner.id(),
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with the given retriability, then succeeds.
    struct FlakyReasoner {
        failures: u32,
        retriable: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReasoningService for FlakyReasoner {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn generate_structured(
            &self,
            _prompt: &str,
            _schema: &serde_json::Value,
        ) -> Result<serde_json::Value, PlanCraftError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(PlanCraftError::Reasoning {
                    provider: "flaky".into(),
                    message: "HTTP 503".into(),
                    retriable: self.retriable,
                })
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_backoff: Duration::from_millis(2),
        }
    }

    fn flaky(failures: u32, retriable: bool) -> Arc<FlakyReasoner> {
        Arc::new(FlakyReasoner {
            failures,
            retriable,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let inner = flaky(2, true);
        let r = RetryReasoner::with_policy(inner.clone(), fast_policy(3));
        let v = r
            .generate_structured("p", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let inner = flaky(10, true);
        let r = RetryReasoner::with_policy(inner.clone(), fast_policy(2));
        assert!(r.generate_structured("p", &serde_json::json!({})).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let inner = flaky(1, false);
        let r = RetryReasoner::with_policy(inner.clone(), fast_policy(5));
        assert!(r.generate_structured("p", &serde_json::json!({})).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_uses_rate_limit_hint() {
        let r = RetryReasoner::new(flaky(0, true));
        let d = r.delay_for_attempt(0, Some(Duration::from_millis(10_000)));
        assert_eq!(d.as_millis(), 10_100);
    }

    #[test]
    fn test_rate_limit_delay_extraction() {
        let err = PlanCraftError::RateLimited {
            provider: "test".into(),
            retry_after_ms: 3000,
        };
        assert_eq!(rate_limit_delay(&err), Some(Duration::from_millis(3000)));

        let err = PlanCraftError::RateLimited {
            provider: "test".into(),
            retry_after_ms: 0,
        };
        assert!(rate_limit_delay(&err).is_none());
    }
}

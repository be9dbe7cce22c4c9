// src/executor/mod.rs — Runs a plan wave by wave with bounded parallelism
//
// Steps in a wave run concurrently (per-plan cap), every capability call holds a
// permit from the engine-wide semaphore. Failed calls are retried per the
// capability's policy, then handed to its fallback once.

pub mod resolve;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityProvider, CapabilityRegistry, InvocationContext, InvokeError};
use crate::core::graph;
use crate::core::types::{
    FailureCategory, Invocation, Outcome, Plan, ProgressEvent, Step, StepError, StepResult,
    StepStatus,
};
use crate::infra::config::ExecutorConfig;
use crate::ledger::{self, PerformanceLedger};

/// Receives lifecycle events while a plan runs.
pub type ProgressFn<'a> = dyn Fn(ProgressEvent) + Send + Sync + 'a;

/// Plan-wide abort signal: fired by the caller's token or by the plan timeout.
struct Abort {
    token: CancellationToken,
    timed_out: AtomicBool,
}

impl Abort {
    fn category(&self) -> FailureCategory {
        if self.timed_out.load(Ordering::SeqCst) {
            FailureCategory::Timeout
        } else {
            FailureCategory::Cancelled
        }
    }
}

pub struct Executor {
    registry: Arc<CapabilityRegistry>,
    ledger: Arc<PerformanceLedger>,
    global: Arc<Semaphore>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        ledger: Arc<PerformanceLedger>,
        config: ExecutorConfig,
    ) -> Self {
        let global = Arc::new(Semaphore::new(config.global_max_concurrent.max(1)));
        Self {
            registry,
            ledger,
            global,
            config,
        }
    }

    /// Share one invocation limit between several executors.
    pub fn with_global_limit(mut self, global: Arc<Semaphore>) -> Self {
        self.global = global;
        self
    }

    pub fn global_limit(&self) -> Arc<Semaphore> {
        self.global.clone()
    }

    pub async fn execute(&self, plan: &Plan, cancel: &CancellationToken) -> Outcome {
        self.execute_with_progress(plan, cancel, &|_| {}).await
    }

    pub async fn execute_with_progress(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
        progress: &ProgressFn<'_>,
    ) -> Outcome {
        let started = Instant::now();
        let waves = match graph::waves(&plan.steps) {
            Ok(w) => w,
            Err(cycle) => {
                warn!(plan_id = %plan.plan_id, "Refusing to run cyclic plan");
                return unrunnable(plan, started, &format!("dependency cycle: {}", cycle.join(" -> ")));
            }
        };

        let abort = Arc::new(Abort {
            token: cancel.child_token(),
            timed_out: AtomicBool::new(false),
        });
        let timer = {
            let abort = abort.clone();
            let limit = Duration::from_secs(self.config.plan_timeout_secs);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        abort.timed_out.store(true, Ordering::SeqCst);
                        abort.token.cancel();
                    }
                    _ = abort.token.cancelled() => {}
                }
            })
        };

        let mut results: HashMap<String, StepResult> = HashMap::new();
        let mut outputs: HashMap<String, Value> = HashMap::new();

        for (wave_no, wave) in waves.iter().enumerate() {
            if abort.token.is_cancelled() {
                break;
            }

            let mut runnable: Vec<(&Step, Value)> = Vec::new();
            for &i in wave {
                let step = &plan.steps[i];
                let blocker = step.depends_on.iter().find(|dep| {
                    results
                        .get(dep.as_str())
                        .map_or(true, |r| r.status != StepStatus::Succeeded)
                });
                if let Some(blocker) = blocker {
                    let result = StepResult::skipped(
                        &step.step_id,
                        &step.capability_id,
                        format!("upstream step '{blocker}' did not succeed"),
                    );
                    finish_step(&plan.plan_id, &result, progress);
                    results.insert(step.step_id.clone(), result);
                    continue;
                }
                match resolve::resolve(&step.parameters, &outputs) {
                    Ok(params) => runnable.push((step, params)),
                    Err(e) => {
                        let result = StepResult::not_run(
                            &step.step_id,
                            &step.capability_id,
                            StepStatus::Failed,
                            FailureCategory::MissingParameter,
                            e.to_string(),
                        );
                        finish_step(&plan.plan_id, &result, progress);
                        results.insert(step.step_id.clone(), result);
                    }
                }
            }
            if runnable.is_empty() {
                continue;
            }

            progress(ProgressEvent::WaveStarted {
                plan_id: plan.plan_id.clone(),
                wave: wave_no,
                steps: runnable.iter().map(|(s, _)| s.step_id.clone()).collect(),
            });

            let finished: Vec<StepResult> = stream::iter(runnable)
                .map(|(step, params)| self.run_step(&plan.plan_id, step, params, &abort))
                .buffer_unordered(self.config.max_parallel_per_plan.max(1))
                .collect()
                .await;

            for result in finished {
                finish_step(&plan.plan_id, &result, progress);
                if result.status == StepStatus::Succeeded {
                    outputs.insert(
                        result.step_id.clone(),
                        result.output.clone().unwrap_or(Value::Null),
                    );
                }
                results.insert(result.step_id.clone(), result);
            }
        }

        timer.abort();
        let aborted = abort.token.is_cancelled();
        let abort_category = abort.category();

        let per_step_results: Vec<StepResult> = plan
            .steps
            .iter()
            .map(|s| {
                results.remove(&s.step_id).unwrap_or_else(|| {
                    let reason = match abort_category {
                        FailureCategory::Timeout => "plan timed out before the step started",
                        _ => "plan was cancelled before the step started",
                    };
                    StepResult::not_run(
                        &s.step_id,
                        &s.capability_id,
                        StepStatus::Skipped,
                        abort_category,
                        reason,
                    )
                })
            })
            .collect();

        let outcome = aggregate(plan, per_step_results, aborted, abort_category, started);
        info!(
            plan_id = %plan.plan_id,
            success = outcome.overall_success,
            partial = outcome.partial,
            aborted = outcome.aborted,
            duration_ms = outcome.total_duration.as_millis() as u64,
            "Plan finished"
        );
        progress(ProgressEvent::PlanFinished {
            plan_id: plan.plan_id.clone(),
            overall_success: outcome.overall_success,
            duration: outcome.total_duration,
        });
        outcome
    }

    async fn run_step(&self, plan_id: &str, step: &Step, params: Value, abort: &Abort) -> StepResult {
        let started = Instant::now();
        let (mut result, primary) = self
            .invoke_capability(plan_id, step, &step.capability_id, &params, abort)
            .await;
        let mut attempts = primary.attempts;
        let mut invocations = vec![primary];
        let mut capability_id = step.capability_id.clone();
        let mut used_fallback = false;

        let fallback = match &result {
            Err(e) if !matches!(e, InvokeError::Cancelled) && !abort.token.is_cancelled() => {
                self.registry.fallback_for(&step.capability_id)
            }
            _ => None,
        };
        if let Some(fallback) = fallback {
            info!(
                plan_id,
                step_id = %step.step_id,
                primary = %step.capability_id,
                fallback = %fallback,
                "Primary exhausted, trying fallback"
            );
            let (fb_result, fb) = self
                .invoke_capability(plan_id, step, &fallback, &params, abort)
                .await;
            attempts += fb.attempts;
            invocations.push(fb);
            result = fb_result;
            capability_id = fallback;
            used_fallback = true;
        }

        let (status, output, error) = match result {
            Ok(output) => (StepStatus::Succeeded, Some(output), None),
            Err(e) => {
                let category = categorize(&e, abort);
                (
                    StepStatus::Failed,
                    None,
                    Some(StepError {
                        category,
                        message: e.to_string(),
                    }),
                )
            }
        };

        let result = StepResult {
            step_id: step.step_id.clone(),
            capability_id,
            status,
            output,
            error,
            attempts,
            latency: started.elapsed(),
            used_fallback,
            invocations,
        };
        for sample in ledger::samples_for(plan_id, &result) {
            self.ledger.record_sample(sample);
        }
        result
    }

    /// One capability with its retry policy. Returns the final result and the
    /// collapsed invocation record.
    async fn invoke_capability(
        &self,
        plan_id: &str,
        step: &Step,
        capability_id: &str,
        params: &Value,
        abort: &Abort,
    ) -> (Result<Value, InvokeError>, Invocation) {
        let record = |attempts: u32, latency: Duration, failure: Option<FailureCategory>| Invocation {
            capability_id: capability_id.to_string(),
            success: failure.is_none(),
            attempts,
            latency,
            failure,
        };

        let Some(provider) = self.registry.provider(capability_id) else {
            let err = InvokeError::failed(format!("capability '{capability_id}' has no provider"));
            return (
                Err(err),
                record(1, Duration::ZERO, Some(FailureCategory::CapabilityError)),
            );
        };
        let policy = self.registry.retry_policy(capability_id);
        let timeout = self
            .ledger
            .timeout_for(capability_id, &self.config.timeout_policy());

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let t0 = Instant::now();
            let result = self
                .attempt_once(&provider, plan_id, &step.step_id, params.clone(), timeout, attempt, abort)
                .await;
            let latency = t0.elapsed();

            let err = match result {
                Ok(v) => return (Ok(v), record(attempt, latency, None)),
                Err(e) => e,
            };
            let retry = err.is_retriable()
                && attempt <= policy.max_retries
                && !abort.token.is_cancelled();
            if !retry {
                let category = categorize(&err, abort);
                return (Err(err), record(attempt, latency, Some(category)));
            }

            let delay = policy.backoff_for(attempt - 1);
            warn!(
                plan_id,
                step_id = %step.step_id,
                capability = capability_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying after error: {}",
                err
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = abort.token.cancelled() => {
                    return (
                        Err(InvokeError::Cancelled),
                        record(attempt, latency, Some(abort.category())),
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_once(
        &self,
        provider: &Arc<dyn CapabilityProvider>,
        plan_id: &str,
        step_id: &str,
        params: Value,
        timeout: Duration,
        attempt: u32,
        abort: &Abort,
    ) -> Result<Value, InvokeError> {
        let _permit = tokio::select! {
            biased;
            _ = abort.token.cancelled() => return Err(InvokeError::Cancelled),
            permit = self.global.acquire() => {
                permit.map_err(|_| InvokeError::failed("executor is shut down"))?
            }
        };

        let ctx = InvocationContext {
            plan_id: plan_id.to_string(),
            step_id: step_id.to_string(),
            timeout,
            attempt,
            cancel: abort.token.child_token(),
        };
        debug!(plan_id, step_id, attempt, timeout_ms = timeout.as_millis() as u64, "Invoking capability");

        tokio::select! {
            biased;
            _ = abort.token.cancelled() => Err(InvokeError::Cancelled),
            r = tokio::time::timeout(timeout, provider.invoke(params, ctx)) => {
                r.unwrap_or(Err(InvokeError::Timeout))
            }
        }
    }
}

fn categorize(err: &InvokeError, abort: &Abort) -> FailureCategory {
    match err {
        InvokeError::Timeout => FailureCategory::Timeout,
        InvokeError::InvalidParameters(_) => FailureCategory::MissingParameter,
        InvokeError::Failed { .. } => FailureCategory::CapabilityError,
        InvokeError::Cancelled => abort.category(),
    }
}

fn finish_step(plan_id: &str, result: &StepResult, progress: &ProgressFn<'_>) {
    debug!(
        plan_id,
        step_id = %result.step_id,
        status = %result.status,
        attempts = result.attempts,
        "Step finished"
    );
    progress(ProgressEvent::StepFinished {
        plan_id: plan_id.to_string(),
        step_id: result.step_id.clone(),
        status: result.status,
        attempts: result.attempts,
    });
}

fn aggregate(
    plan: &Plan,
    per_step_results: Vec<StepResult>,
    aborted: bool,
    abort_category: FailureCategory,
    started: Instant,
) -> Outcome {
    let overall_success = !per_step_results.is_empty()
        && per_step_results
            .iter()
            .all(|r| r.status == StepStatus::Succeeded);
    let any_succeeded = per_step_results
        .iter()
        .any(|r| r.status == StepStatus::Succeeded);

    let error_taxonomy = if overall_success {
        None
    } else if per_step_results.is_empty() {
        Some(FailureCategory::ValidationError)
    } else {
        per_step_results
            .iter()
            .find(|r| r.status == StepStatus::Failed)
            .and_then(StepResult::category)
            .or(aborted.then_some(abort_category))
            .or_else(|| per_step_results.iter().find_map(StepResult::category))
    };

    Outcome {
        plan_id: plan.plan_id.clone(),
        per_step_results,
        overall_success,
        partial: any_succeeded && !overall_success,
        aborted,
        total_duration: started.elapsed(),
        error_taxonomy,
        finished_at: Utc::now(),
    }
}

fn unrunnable(plan: &Plan, started: Instant, reason: &str) -> Outcome {
    let results = plan
        .steps
        .iter()
        .map(|s| {
            StepResult::not_run(
                &s.step_id,
                &s.capability_id,
                StepStatus::Skipped,
                FailureCategory::ValidationError,
                reason,
            )
        })
        .collect();
    aggregate(plan, results, false, FailureCategory::ValidationError, started)
}

// src/core/engine.rs — Plan, execute, learn: the request loop
//
// The engine owns the shared learning state (pattern memory, ledger) and wires it
// into the planner, executor and learning coordinator. Learning happens after the
// response is assembled, either inline or through the bounded queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{FailureCategory, Outcome, Plan, ProgressEvent, RequestContext};
use crate::capability::CapabilityRegistry;
use crate::executor::Executor;
use crate::infra::config::{Config, LearningConfig, LearningMode};
use crate::learner::{LearningCoordinator, LearningJob, LearningQueue};
use crate::ledger::{PerformanceLedger, PerformanceRecord};
use crate::memory::{MemoryManager, PatternMemory, SharedStore};
use crate::planner::Planner;
use crate::provider::{self, EmbeddingService, ReasoningService};

/// Recently planned requests kept in memory for `inspect_plan`.
const RECENT_PLANS: usize = 512;

/// What the caller gets back for one request.
#[derive(Debug, Clone)]
pub struct RequestReport {
    pub plan: Plan,
    /// `None` when nothing was executed because no valid plan exists.
    pub outcome: Option<Outcome>,
    pub summary: String,
}

struct RecentPlans {
    by_id: HashMap<String, Plan>,
    order: VecDeque<String>,
}

impl RecentPlans {
    fn insert(&mut self, plan: Plan) {
        if self.by_id.insert(plan.plan_id.clone(), plan.clone()).is_none() {
            self.order.push_back(plan.plan_id);
        }
        while self.order.len() > RECENT_PLANS {
            if let Some(old) = self.order.pop_front() {
                self.by_id.remove(&old);
            }
        }
    }
}

pub struct Engine {
    registry: Arc<CapabilityRegistry>,
    patterns: Arc<PatternMemory>,
    ledger: Arc<PerformanceLedger>,
    planner: Planner,
    executor: Executor,
    coordinator: Arc<LearningCoordinator>,
    queue: Option<LearningQueue>,
    store: Option<SharedStore>,
    learning: LearningConfig,
    recent: Mutex<RecentPlans>,
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl Engine {
    /// Wire up an engine. Loads persisted patterns and ledger records from `store`.
    /// Deferred learning spawns a worker, so call this inside a Tokio runtime.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        reasoner: Arc<dyn ReasoningService>,
        embedder: Arc<dyn EmbeddingService>,
        store: Option<SharedStore>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let patterns = Arc::new(PatternMemory::new(store.clone()));
        let ledger = Arc::new(PerformanceLedger::new(
            config.learning.ema_alpha,
            store.clone(),
        ));
        let loaded_patterns = patterns.load()?;
        let loaded_records = ledger.load()?;
        debug!(
            patterns = loaded_patterns,
            ledger_records = loaded_records,
            "Loaded learning state"
        );

        let planner = Planner::new(
            registry.clone(),
            patterns.clone(),
            ledger.clone(),
            reasoner,
            embedder.clone(),
            config.planner.clone(),
        );
        let executor = Executor::new(registry.clone(), ledger.clone(), config.executor.clone());
        let coordinator = Arc::new(LearningCoordinator::new(
            patterns.clone(),
            ledger.clone(),
            embedder,
            planner.extractor(),
            store.clone(),
            config.learning.clone(),
        ));
        let queue = match config.learning.mode {
            LearningMode::Deferred => Some(LearningQueue::start(
                coordinator.clone(),
                config.learning.queue_capacity,
                config.learning.backpressure,
            )?),
            LearningMode::Inline => None,
        };

        Ok(Self {
            registry,
            patterns,
            ledger,
            planner,
            executor,
            coordinator,
            queue,
            store,
            learning: config.learning.clone(),
            recent: Mutex::new(RecentPlans {
                by_id: HashMap::new(),
                order: VecDeque::new(),
            }),
            on_progress: None,
        })
    }

    /// Open the on-disk store and build the configured services.
    pub fn open(config: &Config, registry: Arc<CapabilityRegistry>) -> anyhow::Result<Self> {
        let db_path = config.memory.resolved_db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = MemoryManager::open(&db_path)?.into_shared();
        let reasoner = provider::build_reasoner(&config.reasoning)?;
        let embedder = provider::build_embedder(&config.embedding, &config.reasoning)?;
        Self::new(registry, reasoner, embedder, Some(store), config)
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn patterns(&self) -> &Arc<PatternMemory> {
        &self.patterns
    }

    pub fn ledger(&self) -> &Arc<PerformanceLedger> {
        &self.ledger
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Share the invocation limit with another engine or executor.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub async fn submit_request(&self, request: &str, context: &RequestContext) -> RequestReport {
        self.submit_request_with_cancel(request, context, &CancellationToken::new())
            .await
    }

    /// Cancelling `cancel` aborts this request's in-flight steps only.
    pub async fn submit_request_with_cancel(
        &self,
        request: &str,
        context: &RequestContext,
        cancel: &CancellationToken,
    ) -> RequestReport {
        let planned = self.planner.plan_detailed(request, context).await;
        let plan = planned.plan;
        self.remember(&plan);
        self.emit(ProgressEvent::PlanReady {
            plan_id: plan.plan_id.clone(),
            steps: plan.steps.len(),
            origin: plan.origin,
            confidence: plan.confidence,
        });

        if !plan.is_executable() {
            let category = plan
                .rejection
                .first()
                .map(|i| i.category())
                .unwrap_or(FailureCategory::ValidationError);
            let outcome = Outcome::not_executed(&plan.plan_id, category);
            self.learn(LearningJob::new(plan.clone(), outcome).with_embedding(planned.embedding))
                .await;
            let summary = summarize(&plan, None);
            return RequestReport {
                plan,
                outcome: None,
                summary,
            };
        }

        let emit = |e: ProgressEvent| self.emit(e);
        let outcome = self
            .executor
            .execute_with_progress(&plan, cancel, &emit)
            .await;
        self.persist_outcome(&outcome);

        self.learn(
            LearningJob::new(plan.clone(), outcome.clone()).with_embedding(planned.embedding),
        )
        .await;

        let summary = summarize(&plan, Some(&outcome));
        RequestReport {
            plan,
            outcome: Some(outcome),
            summary,
        }
    }

    /// A plan by id: recent ones from memory, older ones from the store.
    pub fn inspect_plan(&self, plan_id: &str) -> Option<Plan> {
        if let Some(plan) = self
            .recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .get(plan_id)
        {
            return Some(plan.clone());
        }
        let store = self.store.as_ref()?;
        let row = match store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_plan(plan_id)
        {
            Ok(row) => row?,
            Err(e) => {
                warn!(plan_id, "Plan lookup failed: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&row.body) {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!(plan_id, "Stored plan is unreadable: {}", e);
                None
            }
        }
    }

    /// One capability's record, or all of them.
    pub fn get_performance(&self, capability_id: Option<&str>) -> Vec<PerformanceRecord> {
        match capability_id {
            Some(id) => self.ledger.get(id).into_iter().collect(),
            None => self.ledger.all(),
        }
    }

    /// Evict patterns unused for longer than the retention window.
    pub fn run_decay(&self) -> usize {
        let window = chrono::Duration::days(i64::from(self.learning.retention_days));
        self.patterns.decay(window)
    }

    /// Wait for queued outcomes, then persist the ledger.
    pub async fn flush_learning(&self) -> anyhow::Result<()> {
        if let Some(queue) = &self.queue {
            queue.flush().await;
        }
        self.ledger.flush()?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        match &self.queue {
            Some(queue) => queue.shutdown().await?,
            None => {
                self.ledger.flush()?;
            }
        }
        info!("Engine shut down");
        Ok(())
    }

    async fn learn(&self, job: LearningJob) {
        match &self.queue {
            Some(queue) => {
                queue.push(job).await;
            }
            None => {
                self.coordinator.ingest_job(&job).await;
            }
        }
    }

    fn remember(&self, plan: &Plan) {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plan.clone());

        let Some(store) = &self.store else { return };
        let body = match serde_json::to_string(plan) {
            Ok(b) => b,
            Err(e) => {
                warn!(plan_id = %plan.plan_id, "Cannot serialize plan: {}", e);
                return;
            }
        };
        let result = store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert_plan(
                &plan.plan_id,
                &plan.source_request,
                &plan.origin.to_string(),
                plan.confidence,
                &body,
            );
        if let Err(e) = result {
            warn!(plan_id = %plan.plan_id, "Failed to persist plan: {}", e);
        }
    }

    fn persist_outcome(&self, outcome: &Outcome) {
        let Some(store) = &self.store else { return };
        let result = serde_json::to_string(outcome)
            .map_err(anyhow::Error::from)
            .and_then(|body| {
                store
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .attach_outcome(&outcome.plan_id, &body)
            });
        if let Err(e) = result {
            warn!(plan_id = %outcome.plan_id, "Failed to persist outcome: {}", e);
        }
    }
}

/// One human-readable paragraph: what ran, what failed, and why.
pub fn summarize(plan: &Plan, outcome: Option<&Outcome>) -> String {
    let Some(outcome) = outcome else {
        let reason = plan
            .explanation
            .as_deref()
            .unwrap_or("no valid plan could be built");
        return format!("Could not plan this request: {reason}");
    };

    let total = outcome.per_step_results.len();
    let ok = outcome.succeeded_count();
    let mut out = if outcome.overall_success {
        format!("Completed all {total} steps in {}ms.", outcome.total_duration.as_millis())
    } else if outcome.partial {
        format!("Partially completed: {ok} of {total} steps succeeded.")
    } else {
        format!("Failed: none of {total} steps succeeded.")
    };
    if outcome.aborted {
        out.push_str(" The plan was aborted before finishing.");
    }
    for failure in outcome.failures() {
        out.push_str(&format!(
            "\n- {} [{}] {}: {}",
            failure.step_id, failure.status, failure.category, failure.message
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PlanOrigin, Step, StepResult, StepStatus};
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_summary_for_unplannable_request() {
        let plan = Plan::cannot_satisfy("order a pizza", "no capability can place orders", vec![]);
        assert_eq!(
            summarize(&plan, None),
            "Could not plan this request: no capability can place orders"
        );
    }

    #[test]
    fn test_summary_lists_failures() {
        let plan = Plan::new(
            "r",
            vec![Step::new("a", "x"), Step::new("b", "y").depends_on("a")],
            PlanOrigin::Fresh,
        );
        let mut a = StepResult::not_run("a", "x", StepStatus::Succeeded, FailureCategory::Timeout, "");
        a.error = None;
        let b = StepResult::not_run("b", "y", StepStatus::Failed, FailureCategory::Timeout, "timed out");
        let outcome = Outcome {
            plan_id: plan.plan_id.clone(),
            per_step_results: vec![a, b],
            overall_success: false,
            partial: true,
            aborted: false,
            total_duration: Duration::from_millis(5),
            error_taxonomy: Some(FailureCategory::Timeout),
            finished_at: Utc::now(),
        };
        let summary = summarize(&plan, Some(&outcome));
        assert!(summary.starts_with("Partially completed: 1 of 2"));
        assert!(summary.contains("b [failed] timeout: timed out"));
    }

    #[test]
    fn test_recent_plans_are_bounded() {
        let mut recent = RecentPlans {
            by_id: HashMap::new(),
            order: VecDeque::new(),
        };
        let first = Plan::new("r0", vec![], PlanOrigin::Fresh);
        let first_id = first.plan_id.clone();
        recent.insert(first);
        for i in 1..=RECENT_PLANS {
            recent.insert(Plan::new(format!("r{i}"), vec![], PlanOrigin::Fresh));
        }
        assert_eq!(recent.by_id.len(), RECENT_PLANS);
        assert!(!recent.by_id.contains_key(&first_id));
    }
}

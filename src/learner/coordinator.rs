// src/learner/coordinator.rs — Folds outcomes into the ledger and pattern memory

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::core::types::{FailureCategory, Outcome, Plan, PlanOrigin, StepStatus};
use crate::infra::config::LearningConfig;
use crate::ledger::{self, PerformanceLedger, SeenWindow, DEFAULT_KEY_WINDOW};
use crate::memory::{Pattern, PatternMemory, SharedStore};
use crate::planner::entities::EntityExtractor;
use crate::planner::template;
use crate::provider::EmbeddingService;

/// One finished request waiting to be learned from.
#[derive(Debug, Clone)]
pub struct LearningJob {
    pub plan: Plan,
    pub outcome: Outcome,
    /// Request embedding computed during planning, if any. Saves a second call.
    pub embedding: Option<Vec<f32>>,
}

impl LearningJob {
    pub fn new(plan: Plan, outcome: Outcome) -> Self {
        Self {
            plan,
            outcome,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// What ingestion did to pattern memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternChange {
    Unchanged,
    Reused(String),
    Merged(String),
    Created(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// The outcome had been ingested before; nothing was applied.
    pub duplicate: bool,
    pub samples_applied: usize,
    pub failures_noted: usize,
    pub pattern: PatternChange,
}

impl IngestReport {
    fn duplicate() -> Self {
        Self {
            duplicate: true,
            samples_applied: 0,
            failures_noted: 0,
            pattern: PatternChange::Unchanged,
        }
    }
}

pub struct LearningCoordinator {
    patterns: Arc<PatternMemory>,
    ledger: Arc<PerformanceLedger>,
    embedder: Arc<dyn EmbeddingService>,
    extractor: Arc<dyn EntityExtractor>,
    store: Option<SharedStore>,
    config: LearningConfig,
    /// Recently claimed plan ids. Older ids are only known to the store.
    ingested: Mutex<SeenWindow<String>>,
}

impl LearningCoordinator {
    pub fn new(
        patterns: Arc<PatternMemory>,
        ledger: Arc<PerformanceLedger>,
        embedder: Arc<dyn EmbeddingService>,
        extractor: Arc<dyn EntityExtractor>,
        store: Option<SharedStore>,
        config: LearningConfig,
    ) -> Self {
        Self {
            patterns,
            ledger,
            embedder,
            extractor,
            store,
            config,
            ingested: Mutex::new(SeenWindow::new(DEFAULT_KEY_WINDOW)),
        }
    }

    /// How many plan ids to remember in memory.
    pub fn with_ingest_window(mut self, window: usize) -> Self {
        self.ingested = Mutex::new(SeenWindow::new(window));
        self
    }

    pub fn ledger(&self) -> &Arc<PerformanceLedger> {
        &self.ledger
    }

    pub async fn ingest(&self, plan: &Plan, outcome: &Outcome) -> IngestReport {
        self.ingest_job(&LearningJob::new(plan.clone(), outcome.clone()))
            .await
    }

    /// Never fails: every problem is logged and the rest of the job still applies.
    pub async fn ingest_job(&self, job: &LearningJob) -> IngestReport {
        let (plan, outcome) = (&job.plan, &job.outcome);
        if plan.plan_id != outcome.plan_id {
            warn!(
                plan_id = %plan.plan_id,
                outcome_plan_id = %outcome.plan_id,
                "Outcome does not belong to plan, ignoring"
            );
            return IngestReport::duplicate();
        }
        if !self.claim(&plan.plan_id) {
            debug!(plan_id = %plan.plan_id, "Outcome already ingested");
            return IngestReport::duplicate();
        }

        let (samples_applied, failures_noted) = self.update_ledger(plan, outcome);
        let pattern = self.update_patterns(job).await;

        info!(
            plan_id = %plan.plan_id,
            success = outcome.overall_success,
            samples = samples_applied,
            failures = failures_noted,
            pattern = ?pattern,
            "Ingested outcome"
        );
        IngestReport {
            duplicate: false,
            samples_applied,
            failures_noted,
            pattern,
        }
    }

    /// Ledger samples for every executed step (already-applied keys are ignored),
    /// plus failure counts for problems that never reached a capability.
    fn update_ledger(&self, plan: &Plan, outcome: &Outcome) -> (usize, usize) {
        let mut applied = 0;
        let mut noted = 0;

        for result in &outcome.per_step_results {
            for sample in ledger::samples_for(&plan.plan_id, result) {
                if self.ledger.record_sample(sample) {
                    applied += 1;
                }
            }
            for inv in &result.invocations {
                if inv.failure == Some(FailureCategory::Cancelled) {
                    self.ledger.note_failure(&inv.capability_id, FailureCategory::Cancelled);
                    noted += 1;
                }
            }
            // Parameter resolution failures happen before invocation.
            if !result.was_executed() && result.status == StepStatus::Failed {
                if let Some(category) = result.category() {
                    self.ledger.note_failure(&result.capability_id, category);
                    noted += 1;
                }
            }
        }

        for issue in &plan.rejection {
            if let Some(capability_id) = issue.capability_id() {
                self.ledger.note_failure(capability_id, issue.category());
                noted += 1;
            }
        }
        (applied, noted)
    }

    async fn update_patterns(&self, job: &LearningJob) -> PatternChange {
        let (plan, outcome) = (&job.plan, &job.outcome);

        if plan.origin == PlanOrigin::Adapted {
            let Some(source) = plan.source_pattern_id.as_deref() else {
                return PatternChange::Unchanged;
            };
            return match self.patterns.record_reuse(source, outcome.overall_success) {
                Some(p) => PatternChange::Reused(p.pattern_id),
                None => {
                    debug!(pattern_id = source, "Source pattern gone, reuse not recorded");
                    PatternChange::Unchanged
                }
            };
        }

        if !outcome.overall_success || plan.confidence < self.config.learning_threshold {
            return PatternChange::Unchanged;
        }

        let embedding = match &job.embedding {
            Some(e) => e.clone(),
            None => match self.embedder.embed(&plan.source_request).await {
                Ok(e) => e,
                Err(e) => {
                    warn!(plan_id = %plan.plan_id, "Cannot embed request, pattern not learned: {}", e);
                    return PatternChange::Unchanged;
                }
            },
        };

        if let Some(near) = self
            .patterns
            .find_similar(&embedding, 1, self.config.merge_threshold)
            .into_iter()
            .next()
        {
            if let Some(p) = self.patterns.merge_success(&near.pattern.pattern_id) {
                return PatternChange::Merged(p.pattern_id);
            }
        }

        let entities = self.extractor.extract(&plan.source_request);
        let plan_template = template::generalize(&plan.steps, &entities);
        let pattern = Pattern::new(plan.source_request.clone(), embedding, plan_template);
        let id = pattern.pattern_id.clone();
        self.patterns.store(pattern);
        PatternChange::Created(id)
    }

    /// True the first time a plan id is seen, here or in the durable store.
    fn claim(&self, plan_id: &str) -> bool {
        if !self
            .ingested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plan_id.to_string())
        {
            return false;
        }
        let Some(store) = &self.store else {
            return true;
        };
        match store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mark_ingested(plan_id)
        {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(plan_id, "Could not persist ingestion marker: {}", e);
                true
            }
        }
    }
}

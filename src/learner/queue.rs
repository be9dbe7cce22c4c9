// src/learner/queue.rs — Bounded hand-off between requests and the learning worker
//
// Requests push finished jobs; a single background task drains them into the
// coordinator. When full, the queue either evicts its oldest job or makes the
// producer wait, depending on `Backpressure`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::coordinator::{LearningCoordinator, LearningJob};
use crate::infra::config::Backpressure;

struct State {
    jobs: VecDeque<LearningJob>,
    busy: bool,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    capacity: usize,
    backpressure: Backpressure,
    /// Wakes the worker (single waiter, so permits may be stored).
    available: Notify,
    /// Wakes producers blocked on a full queue.
    space: Notify,
    /// Wakes `flush` callers once the queue is empty and the worker is idle.
    idle: Notify,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct LearningQueue {
    shared: Arc<Shared>,
    coordinator: Arc<LearningCoordinator>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LearningQueue {
    /// Spawn the worker. Must be called inside a Tokio runtime.
    pub fn start(
        coordinator: Arc<LearningCoordinator>,
        capacity: usize,
        backpressure: Backpressure,
    ) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("learning queue needs a Tokio runtime: {e}"))?;
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                busy: false,
                closed: false,
            }),
            capacity: capacity.max(1),
            backpressure,
            available: Notify::new(),
            space: Notify::new(),
            idle: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        let worker = runtime.spawn(run_worker(shared.clone(), coordinator.clone()));
        Ok(Self {
            shared,
            coordinator,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue a job. Returns `false` if the queue is shut down.
    pub async fn push(&self, job: LearningJob) -> bool {
        let mut job = Some(job);
        loop {
            let space = self.shared.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();
            {
                let mut st = self.shared.lock();
                if st.closed {
                    warn!("Learning queue is closed, outcome not learned");
                    return false;
                }
                let full = st.jobs.len() >= self.shared.capacity;
                if full && self.shared.backpressure == Backpressure::DropOldest {
                    if let Some(old) = st.jobs.pop_front() {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(plan_id = %old.plan.plan_id, "Learning queue full, dropped oldest outcome");
                    }
                }
                if st.jobs.len() < self.shared.capacity {
                    if let Some(job) = job.take() {
                        st.jobs.push_back(job);
                    }
                    drop(st);
                    self.shared.available.notify_one();
                    return true;
                }
            }
            debug!("Learning queue full, waiting for space");
            space.await;
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs evicted by `drop_oldest` since start.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every queued job has been ingested.
    pub async fn flush(&self) {
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            {
                let st = self.shared.lock();
                if st.jobs.is_empty() && !st.busy {
                    return;
                }
                if st.closed && self.worker_finished() {
                    return;
                }
            }
            idle.await;
        }
    }

    /// Drain remaining jobs, stop the worker and persist the ledger.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        {
            let mut st = self.shared.lock();
            if st.closed {
                return Ok(());
            }
            st.closed = true;
        }
        self.shared.available.notify_one();
        self.shared.space.notify_waiters();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Learning worker ended abnormally: {}", e);
            }
        }
        let written = self.coordinator.ledger().flush()?;
        info!(ledger_records = written, "Learning queue shut down");
        Ok(())
    }

    fn worker_finished(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(true, |h| h.is_finished())
    }
}

enum Next {
    Job(Box<LearningJob>),
    Wait,
    Stop,
}

async fn run_worker(shared: Arc<Shared>, coordinator: Arc<LearningCoordinator>) {
    loop {
        let next = {
            let mut st = shared.lock();
            match st.jobs.pop_front() {
                Some(job) => {
                    st.busy = true;
                    Next::Job(Box::new(job))
                }
                None if st.closed => Next::Stop,
                None => Next::Wait,
            }
        };
        match next {
            Next::Job(job) => {
                shared.space.notify_waiters();
                coordinator.ingest_job(&job).await;
                shared.lock().busy = false;
                shared.idle.notify_waiters();
            }
            Next::Wait => shared.available.notified().await,
            Next::Stop => break,
        }
    }
    shared.idle.notify_waiters();
    debug!("Learning worker stopped");
}

// src/learner/mod.rs — Learning from finished plans

pub mod coordinator;
pub mod queue;

pub use coordinator::{IngestReport, LearningCoordinator, LearningJob, PatternChange};
pub use queue::LearningQueue;

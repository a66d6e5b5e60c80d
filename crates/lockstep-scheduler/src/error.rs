use lockstep_core::CoreError;
use lockstep_graph::GraphError;
use thiserror::Error;

/// Errors raised while configuring or starting the scheduler.
///
/// Failures of individual runs are never errors; they are reported through
/// the run's [`JobResult`](lockstep_core::JobResult).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// A trigger whose schedule settings are missing or contradictory.
    #[error("Invalid trigger '{trigger}': {reason}")]
    InvalidTrigger { trigger: String, reason: String },

    #[error("Unknown job: {name}")]
    UnknownJob { name: String },

    #[error("Job '{name}' is registered more than once")]
    DuplicateJob { name: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Invalid parameters: {0}")]
    Params(#[from] CoreError),

    #[error("Worker pool error: {0}")]
    Pool(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

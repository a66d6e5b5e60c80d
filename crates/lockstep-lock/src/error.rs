use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    /// The bounded wait expired. Callers treat this as "not acquired".
    #[error("Timed out after {ms}ms waiting for lock '{name}'")]
    Timeout { name: String, ms: u64 },

    /// The coordination backend failed for a reason other than contention.
    #[error("Lock backend error: {0}")]
    Backend(String),

    #[error("Failed to release lock '{name}': {reason}")]
    Release { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, LockError>;

use std::sync::Arc;

use lockstep_core::{JobMetadata, RunnableJob};

/// Wraps a unit of work with at-most-one-concurrent-execution semantics.
///
/// The wrapped job, when run, acquires the lock named after the job, runs
/// the inner job and always releases afterwards. If the lock is taken it
/// returns `SKIPPED` without running the inner job.
pub trait LockHandler: Send + Sync {
    fn locking_job(
        &self,
        job: Arc<dyn RunnableJob>,
        metadata: &JobMetadata,
    ) -> Arc<dyn RunnableJob>;

    /// Release long-lived resources such as a cluster session.
    fn shutdown(&self) {}
}

/// Lock name for a job, optionally prefixed with a namespace so that
/// applications sharing a coordination backend do not collide.
pub fn lock_name(namespace: Option<&str>, metadata: &JobMetadata) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}:{}", metadata.name()),
        _ => metadata.name().to_string(),
    }
}

pub(crate) fn skip_message(lock_name: &str) -> String {
    format!("Skipped: another execution holds lock '{lock_name}'")
}

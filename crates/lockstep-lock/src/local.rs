use std::sync::{Arc, Mutex, TryLockError};

use dashmap::DashMap;
use lockstep_core::{JobMetadata, JobParams, JobResult, RunnableJob};
use tracing::{debug, info};

use crate::handler::{lock_name, skip_message, LockHandler};

/// Process-scoped locking: one mutex per lock name, never waited on.
#[derive(Clone, Default)]
pub struct LocalLockHandler {
    namespace: Option<String>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LocalLockHandler {
    pub fn new(namespace: Option<String>) -> Self {
        Self {
            namespace,
            locks: Arc::new(DashMap::new()),
        }
    }
}

impl LockHandler for LocalLockHandler {
    fn locking_job(
        &self,
        job: Arc<dyn RunnableJob>,
        metadata: &JobMetadata,
    ) -> Arc<dyn RunnableJob> {
        Arc::new(LocalLockedJob {
            lock_name: lock_name(self.namespace.as_deref(), metadata),
            locks: Arc::clone(&self.locks),
            inner: job,
        })
    }
}

struct LocalLockedJob {
    lock_name: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    inner: Arc<dyn RunnableJob>,
}

impl RunnableJob for LocalLockedJob {
    fn metadata(&self) -> &JobMetadata {
        self.inner.metadata()
    }

    fn params(&self) -> &JobParams {
        self.inner.params()
    }

    fn run(&self) -> anyhow::Result<JobResult> {
        // Clone the Arc out so the map shard is not held while the job runs.
        let mutex = Arc::clone(&self.locks.entry(self.lock_name.clone()).or_default());

        let _guard = match mutex.try_lock() {
            Ok(guard) => guard,
            // A previous holder panicked; the lock itself is still usable.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                info!(lock = %self.lock_name, "local lock busy, skipping");
                return Ok(JobResult::skipped(skip_message(&self.lock_name)));
            }
        };

        debug!(lock = %self.lock_name, "local lock acquired");
        self.inner.run()
    }
}

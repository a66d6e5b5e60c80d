use std::sync::Arc;

use lockstep_core::{JobMetadata, RunnableJob};

use crate::handler::LockHandler;
use crate::local::LocalLockHandler;

/// Local lock outside, cluster lock inside.
///
/// Same-process contention is settled by the local mutex, so the cluster
/// backend is only contacted when this process is not already running the job.
pub struct CompositeLockHandler {
    local: LocalLockHandler,
    cluster: Arc<dyn LockHandler>,
}

impl CompositeLockHandler {
    pub fn new(local: LocalLockHandler, cluster: Arc<dyn LockHandler>) -> Self {
        Self { local, cluster }
    }
}

impl LockHandler for CompositeLockHandler {
    fn locking_job(
        &self,
        job: Arc<dyn RunnableJob>,
        metadata: &JobMetadata,
    ) -> Arc<dyn RunnableJob> {
        let clustered = self.cluster.locking_job(job, metadata);
        self.local.locking_job(clustered, metadata)
    }

    fn shutdown(&self) {
        self.local.shutdown();
        self.cluster.shutdown();
    }
}

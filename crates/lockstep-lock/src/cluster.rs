//! Cluster-scoped locking over a pluggable coordination backend.
//!
//! The engine never talks to a coordination service directly: adapters
//! implement [`ClusterConnector`] / [`ClusterSession`] / [`ClusterLease`] and
//! [`ClusterLockHandler`] supplies the lock-around-job semantics.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lockstep_core::{JobMetadata, JobParams, JobResult, RunnableJob};
use tracing::{debug, info, warn};

use crate::error::{LockError, Result};
use crate::handler::{lock_name, skip_message, LockHandler};

/// Opens the process-wide session to a coordination backend.
pub trait ClusterConnector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn ClusterSession>>;
}

/// Long-lived handle shared by every lock attempt of the process.
pub trait ClusterSession: Send + Sync {
    /// Take `lock_name`, waiting at most `wait`. `Ok(None)` or
    /// [`LockError::Timeout`] both mean "held elsewhere".
    fn try_acquire(
        &self,
        lock_name: &str,
        wait: Duration,
    ) -> Result<Option<Box<dyn ClusterLease>>>;

    fn close(&self) {}
}

/// A held cluster lock.
pub trait ClusterLease: Send {
    fn release(self: Box<Self>) -> Result<()>;
}

struct SessionCell {
    connector: Arc<dyn ClusterConnector>,
    session: Mutex<Option<Arc<dyn ClusterSession>>>,
}

impl SessionCell {
    /// Connect on first use; later calls share the same session.
    fn get(&self) -> Result<Arc<dyn ClusterSession>> {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }
        let session = self.connector.connect()?;
        info!("cluster lock session opened");
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    fn close(&self) {
        let taken = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = taken {
            session.close();
            info!("cluster lock session closed");
        }
    }
}

pub struct ClusterLockHandler {
    namespace: Option<String>,
    wait: Duration,
    cell: Arc<SessionCell>,
}

impl ClusterLockHandler {
    pub fn new(
        connector: Arc<dyn ClusterConnector>,
        namespace: Option<String>,
        wait: Duration,
    ) -> Self {
        Self {
            namespace,
            wait,
            cell: Arc::new(SessionCell {
                connector,
                session: Mutex::new(None),
            }),
        }
    }
}

impl LockHandler for ClusterLockHandler {
    fn locking_job(
        &self,
        job: Arc<dyn RunnableJob>,
        metadata: &JobMetadata,
    ) -> Arc<dyn RunnableJob> {
        Arc::new(ClusterLockedJob {
            lock_name: lock_name(self.namespace.as_deref(), metadata),
            wait: self.wait,
            cell: Arc::clone(&self.cell),
            inner: job,
        })
    }

    fn shutdown(&self) {
        self.cell.close();
    }
}

struct ClusterLockedJob {
    lock_name: String,
    wait: Duration,
    cell: Arc<SessionCell>,
    inner: Arc<dyn RunnableJob>,
}

/// Releases on drop, so the lock is given back even if the job panics.
struct LeaseGuard<'a> {
    lock_name: &'a str,
    lease: Option<Box<dyn ClusterLease>>,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        match lease.release() {
            Ok(()) => debug!(lock = %self.lock_name, "cluster lock released"),
            Err(e) => warn!(
                lock = %self.lock_name,
                error = %e,
                "failed to release cluster lock, manual intervention may be needed"
            ),
        }
    }
}

impl RunnableJob for ClusterLockedJob {
    fn metadata(&self) -> &JobMetadata {
        self.inner.metadata()
    }

    fn params(&self) -> &JobParams {
        self.inner.params()
    }

    fn run(&self) -> anyhow::Result<JobResult> {
        let session = self.cell.get()?;

        let lease = match session.try_acquire(&self.lock_name, self.wait) {
            Ok(Some(lease)) => lease,
            Ok(None) | Err(LockError::Timeout { .. }) => {
                info!(lock = %self.lock_name, "cluster lock held elsewhere, skipping");
                return Ok(JobResult::skipped(skip_message(&self.lock_name)));
            }
            Err(e) => return Err(e.into()),
        };

        let _guard = LeaseGuard {
            lock_name: &self.lock_name,
            lease: Some(lease),
        };
        debug!(lock = %self.lock_name, "cluster lock acquired");
        self.inner.run()
    }
}

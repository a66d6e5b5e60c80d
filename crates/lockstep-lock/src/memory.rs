//! In-process stand-in for a coordination service.
//!
//! Several handlers built from the same [`MemoryCluster`] share one lock
//! space, which is how tests model separate nodes without a real backend.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cluster::{ClusterConnector, ClusterLease, ClusterSession};
use crate::error::{LockError, Result};

#[derive(Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    freed: Condvar,
}

impl LockTable {
    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
pub struct MemoryCluster {
    table: Arc<LockTable>,
}

impl MemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_held(&self, lock_name: &str) -> bool {
        self.table.held().contains(lock_name)
    }
}

impl ClusterConnector for MemoryCluster {
    fn connect(&self) -> Result<Arc<dyn ClusterSession>> {
        Ok(Arc::new(MemorySession {
            table: Arc::clone(&self.table),
        }))
    }
}

struct MemorySession {
    table: Arc<LockTable>,
}

impl ClusterSession for MemorySession {
    fn try_acquire(
        &self,
        lock_name: &str,
        wait: Duration,
    ) -> Result<Option<Box<dyn ClusterLease>>> {
        let held = self.table.held();
        let (mut held, timeout) = self
            .table
            .freed
            .wait_timeout_while(held, wait, |h| h.contains(lock_name))
            .unwrap_or_else(PoisonError::into_inner);

        if timeout.timed_out() && held.contains(lock_name) {
            return Err(LockError::Timeout {
                name: lock_name.to_string(),
                ms: wait.as_millis() as u64,
            });
        }
        held.insert(lock_name.to_string());
        Ok(Some(Box::new(MemoryLease {
            table: Arc::clone(&self.table),
            lock_name: lock_name.to_string(),
        })))
    }
}

struct MemoryLease {
    table: Arc<LockTable>,
    lock_name: String,
}

impl ClusterLease for MemoryLease {
    fn release(self: Box<Self>) -> Result<()> {
        let removed = self.table.held().remove(&self.lock_name);
        self.table.freed.notify_all();
        if removed {
            Ok(())
        } else {
            Err(LockError::Release {
                name: self.lock_name.clone(),
                reason: "lock was not held".into(),
            })
        }
    }
}

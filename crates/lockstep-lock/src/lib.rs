//! `lockstep-lock` — at-most-one-concurrent-execution wrappers for jobs.
//!
//! | Handler                  | Scope                                          |
//! |--------------------------|------------------------------------------------|
//! | [`LocalLockHandler`]     | one process, non-blocking mutex per lock name  |
//! | [`ClusterLockHandler`]   | cluster, via a pluggable [`ClusterConnector`]  |
//! | [`CompositeLockHandler`] | local first, then cluster                      |
//!
//! Contention is not an error: a job that cannot get its lock returns
//! `SKIPPED`.

pub mod cluster;
pub mod composite;
pub mod error;
pub mod handler;
pub mod local;
pub mod memory;

#[cfg(test)]
mod testing;

pub use cluster::{ClusterConnector, ClusterLease, ClusterLockHandler, ClusterSession};
pub use composite::CompositeLockHandler;
pub use error::{LockError, Result};
pub use handler::{lock_name, LockHandler};
pub use local::LocalLockHandler;
pub use memory::MemoryCluster;

//! `lockstep-core` — the job contract shared by every lockstep crate.
//!
//! Holds the [`Job`] / [`RunnableJob`] traits, job and parameter metadata,
//! [`JobResult`] outcomes, the [`JobFuture`] completion handle and the
//! figment-backed [`config::LockstepConfig`].

pub mod config;
pub mod error;
pub mod future;
pub mod job;
pub mod types;

pub use error::{CoreError, Result};
pub use future::JobFuture;
pub use job::{FnJob, Job, RunnableJob};
pub use types::{JobMetadata, JobOutcome, JobParameterMetadata, JobParams, JobResult, ParamType};

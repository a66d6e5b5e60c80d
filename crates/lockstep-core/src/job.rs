use crate::types::{JobMetadata, JobParams, JobResult};

/// Business logic registered with the engine.
///
/// Bodies are ordinary blocking functions; each invocation occupies one pool
/// thread for its whole duration. Returning `Ok(None)` means the job reported
/// no result, which the engine records as `UNKNOWN`.
pub trait Job: Send + Sync {
    fn metadata(&self) -> &JobMetadata;

    fn run(&self, params: &JobParams) -> anyhow::Result<Option<JobResult>>;
}

/// A job bound to concrete parameters, ready for the worker pool.
///
/// Implementations are decorators layered by the runnable factory chain.
/// An `Err` is an unexpected fault; the outermost layer converts it into a
/// failure result.
pub trait RunnableJob: Send + Sync {
    fn metadata(&self) -> &JobMetadata;

    fn params(&self) -> &JobParams;

    fn run(&self) -> anyhow::Result<JobResult>;
}

/// Closure-backed [`Job`].
pub struct FnJob<F> {
    metadata: JobMetadata,
    body: F,
}

impl<F> FnJob<F>
where
    F: Fn(&JobParams) -> anyhow::Result<Option<JobResult>> + Send + Sync,
{
    pub fn new(metadata: JobMetadata, body: F) -> Self {
        Self { metadata, body }
    }
}

impl<F> Job for FnJob<F>
where
    F: Fn(&JobParams) -> anyhow::Result<Option<JobResult>> + Send + Sync,
{
    fn metadata(&self) -> &JobMetadata {
        &self.metadata
    }

    fn run(&self, params: &JobParams) -> anyhow::Result<Option<JobResult>> {
        (self.body)(params)
    }
}

//! Factory chain turning a registered [`Job`] plus parameters into the
//! [`RunnableJob`] the pool executes.
//!
//! The default chain, outermost first:
//!
//! 1. [`ErrorHandlingRunnableJobFactory`] turns errors and panics into `FAILURE`
//! 2. [`LockAwareRunnableJobFactory`] wraps serial jobs with the lock handler
//! 3. [`SimpleRunnableJobFactory`] binds the params and logs the run

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use lockstep_core::{Job, JobMetadata, JobParams, JobResult, RunnableJob};
use lockstep_lock::LockHandler;
use tracing::{error, info};
use uuid::Uuid;

use crate::pool::panic_message;

pub trait RunnableJobFactory: Send + Sync {
    fn runnable(&self, job: Arc<dyn Job>, params: JobParams) -> Arc<dyn RunnableJob>;
}

/// `ErrorHandling(LockAware(Simple))` over `lock_handler`.
pub fn default_factory(lock_handler: Arc<dyn LockHandler>) -> Arc<dyn RunnableJobFactory> {
    let simple: Arc<dyn RunnableJobFactory> = Arc::new(SimpleRunnableJobFactory);
    let lock_aware = Arc::new(LockAwareRunnableJobFactory::new(simple, lock_handler));
    Arc::new(ErrorHandlingRunnableJobFactory::new(lock_aware))
}

pub struct SimpleRunnableJobFactory;

impl RunnableJobFactory for SimpleRunnableJobFactory {
    fn runnable(&self, job: Arc<dyn Job>, params: JobParams) -> Arc<dyn RunnableJob> {
        Arc::new(SimpleRunnableJob { job, params })
    }
}

struct SimpleRunnableJob {
    job: Arc<dyn Job>,
    params: JobParams,
}

impl RunnableJob for SimpleRunnableJob {
    fn metadata(&self) -> &JobMetadata {
        self.job.metadata()
    }

    fn params(&self) -> &JobParams {
        &self.params
    }

    fn run(&self) -> anyhow::Result<JobResult> {
        let name = self.job.metadata().name();
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(job = name, %run_id, "job started");

        let result = self
            .job
            .run(&self.params)?
            .unwrap_or_else(JobResult::unknown);

        info!(
            job = name,
            %run_id,
            outcome = %result.outcome(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job finished"
        );
        Ok(result)
    }
}

/// Applies the lock handler to jobs whose metadata marks them serial.
pub struct LockAwareRunnableJobFactory {
    delegate: Arc<dyn RunnableJobFactory>,
    lock_handler: Arc<dyn LockHandler>,
}

impl LockAwareRunnableJobFactory {
    pub fn new(delegate: Arc<dyn RunnableJobFactory>, lock_handler: Arc<dyn LockHandler>) -> Self {
        Self {
            delegate,
            lock_handler,
        }
    }
}

impl RunnableJobFactory for LockAwareRunnableJobFactory {
    fn runnable(&self, job: Arc<dyn Job>, params: JobParams) -> Arc<dyn RunnableJob> {
        let serial = job.metadata().is_serial();
        let inner = self.delegate.runnable(Arc::clone(&job), params);
        if serial {
            self.lock_handler.locking_job(inner, job.metadata())
        } else {
            inner
        }
    }
}

pub struct ErrorHandlingRunnableJobFactory {
    delegate: Arc<dyn RunnableJobFactory>,
}

impl ErrorHandlingRunnableJobFactory {
    pub fn new(delegate: Arc<dyn RunnableJobFactory>) -> Self {
        Self { delegate }
    }
}

impl RunnableJobFactory for ErrorHandlingRunnableJobFactory {
    fn runnable(&self, job: Arc<dyn Job>, params: JobParams) -> Arc<dyn RunnableJob> {
        Arc::new(ErrorHandlingRunnableJob {
            inner: self.delegate.runnable(job, params),
        })
    }
}

/// Never returns `Err`: every fault below it becomes a `FAILURE` result.
struct ErrorHandlingRunnableJob {
    inner: Arc<dyn RunnableJob>,
}

impl RunnableJob for ErrorHandlingRunnableJob {
    fn metadata(&self) -> &JobMetadata {
        self.inner.metadata()
    }

    fn params(&self) -> &JobParams {
        self.inner.params()
    }

    fn run(&self) -> anyhow::Result<JobResult> {
        let name = self.inner.metadata().name();
        match catch_unwind(AssertUnwindSafe(|| self.inner.run())) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                error!(job = name, error = %format!("{e:#}"), "job failed with an error");
                Ok(JobResult::failure_from(e))
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(job = name, panic = %message, "job panicked");
                Ok(JobResult::failure(format!("Job panicked: {message}")))
            }
        }
    }
}

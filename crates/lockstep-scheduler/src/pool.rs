//! Bounded worker pool.
//!
//! Job bodies are blocking code, so every unit runs on tokio's blocking
//! pool, capped at the configured thread count; excess submissions queue.
//! The async side of the same runtime only drives timers (delayed
//! submissions, triggers).

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lockstep_core::{JobFuture, JobResult, RunnableJob};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};

/// Owns the pool runtime. Dropping it shuts the pool down.
pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    handle: PoolHandle,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("lockstep-worker")
            .enable_all()
            .build()
            .map_err(|e| SchedulerError::Pool(e.to_string()))?;
        info!(threads, "worker pool started");
        Ok(Self {
            handle: PoolHandle {
                runtime: runtime.handle().clone(),
            },
            runtime: Mutex::new(Some(runtime)),
            threads,
        })
    }

    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Stop accepting work. Running bodies finish on their own threads;
    /// queued units are dropped and their futures complete as `UNKNOWN`.
    pub fn shutdown(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
            info!("worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable submission handle. Group continuations carry one so they can
/// resubmit themselves.
#[derive(Clone)]
pub struct PoolHandle {
    runtime: Handle,
}

impl PoolHandle {
    pub fn submit(&self, job: Arc<dyn RunnableJob>) -> JobFuture {
        self.submit_after(job, Duration::ZERO)
    }

    /// Submit `job` to start no earlier than `delay` from now.
    pub fn submit_after(&self, job: Arc<dyn RunnableJob>, delay: Duration) -> JobFuture {
        let name = job.metadata().name().to_string();
        self.submit_fn_after(name, delay, move || job.run())
    }

    /// Submit a closure as a unit of work. An `Err` or a panic completes the
    /// future with a failure.
    pub fn submit_fn_after<F>(&self, name: String, delay: Duration, work: F) -> JobFuture
    where
        F: FnOnce() -> anyhow::Result<JobResult> + Send + 'static,
    {
        let future = JobFuture::pending(name, delay);
        let unit = Unit {
            future: future.clone(),
            work: Some(work),
        };

        let task = if delay.is_zero() {
            self.runtime.spawn_blocking(move || unit.run()).abort_handle()
        } else {
            let runtime = self.runtime.clone();
            self.runtime
                .spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = runtime.spawn_blocking(move || unit.run()).await;
                })
                .abort_handle()
        };
        future.set_abort_handle(task);
        future
    }

    /// Run an async task on the pool runtime.
    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task)
    }
}

/// One queued submission. If it is dropped without running (cancelled,
/// pool shut down) its future still completes.
struct Unit<F> {
    future: JobFuture,
    work: Option<F>,
}

impl<F> Unit<F>
where
    F: FnOnce() -> anyhow::Result<JobResult>,
{
    fn run(mut self) {
        let Some(work) = self.work.take() else {
            return;
        };
        if self.future.is_cancelled() {
            return;
        }
        let result = match catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => JobResult::failure_from(e),
            Err(panic) => JobResult::failure(format!("Job panicked: {}", panic_message(&*panic))),
        };
        if !self.future.complete(result) {
            debug!(job = self.future.name(), "result discarded, future already completed");
        }
    }
}

impl<F> Drop for Unit<F> {
    fn drop(&mut self) {
        if self.work.is_some() {
            self.future
                .complete(JobResult::unknown_with("Job dropped before it started"));
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::JobOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn runs_submitted_work() {
        let pool = WorkerPool::new(2).unwrap();
        let future = pool
            .handle()
            .submit_fn_after("ok".into(), Duration::ZERO, || Ok(JobResult::success()));
        assert!(future.get().is_success());
        assert_eq!(future.name(), "ok");
    }

    #[test]
    fn errors_and_panics_become_failures() {
        let pool = WorkerPool::new(1).unwrap();
        let err = pool.handle().submit_fn_after("err".into(), Duration::ZERO, || {
            Err(anyhow::anyhow!("disk full"))
        });
        let result = err.get();
        assert_eq!(result.outcome(), JobOutcome::Failure);
        assert_eq!(result.message(), Some("disk full"));

        let panicked = pool
            .handle()
            .submit_fn_after("panic".into(), Duration::ZERO, || panic!("kaboom"));
        let result = panicked.get();
        assert_eq!(result.outcome(), JobOutcome::Failure);
        assert!(result.message().unwrap().contains("kaboom"));
    }

    #[test]
    fn concurrency_is_bounded_by_thread_count() {
        let pool = WorkerPool::new(2).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures: Vec<_> = (0..6)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                pool.handle()
                    .submit_fn_after(format!("w{i}"), Duration::ZERO, move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(30));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(JobResult::success())
                    })
            })
            .collect();

        for f in &futures {
            assert!(f.get().is_success());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn delayed_submission_waits() {
        let pool = WorkerPool::new(1).unwrap();
        let start = Instant::now();
        let future = pool.handle().submit_fn_after(
            "later".into(),
            Duration::from_millis(50),
            || Ok(JobResult::success()),
        );
        assert!(future.get().is_success());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn cancelled_delayed_work_never_runs() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        let future = pool.handle().submit_fn_after(
            "never".into(),
            Duration::from_millis(200),
            move || {
                let _ = tx.send(());
                Ok(JobResult::success())
            },
        );
        assert!(future.cancel());
        assert_eq!(future.get().outcome(), JobOutcome::Unknown);
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }

    #[test]
    fn shutdown_completes_queued_futures() {
        let pool = WorkerPool::new(1).unwrap();
        let queued = pool.handle().submit_fn_after(
            "queued".into(),
            Duration::from_secs(60),
            || Ok(JobResult::success()),
        );
        pool.shutdown();
        let result = queued.get_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.outcome(), JobOutcome::Unknown);
    }
}

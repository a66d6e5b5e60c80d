//! Job groups: an execution plan run as a sequence of steps.
//!
//! A step either runs one job inline or runs a batch in parallel (the first
//! member inline, the rest on the pool). A group never parks a pool thread
//! waiting for its children. When a step still has work in flight the group
//! returns `YIELDED` and resubmits itself after a short poll delay; the
//! resubmitted continuation carries the remaining steps and the futures it
//! is waiting on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use lockstep_core::{Job, JobFuture, JobMetadata, JobOutcome, JobParams, JobResult, RunnableJob};
use tracing::{debug, info, warn};

use crate::pool::PoolHandle;

/// One stage of a group's plan.
#[derive(Clone)]
pub enum Step {
    Single(Arc<dyn RunnableJob>),
    Parallel(Vec<Arc<dyn RunnableJob>>),
}

impl Step {
    /// `None` for an empty layer.
    pub fn from_layer(mut layer: Vec<Arc<dyn RunnableJob>>) -> Option<Step> {
        match layer.len() {
            0 => None,
            1 => layer.pop().map(Step::Single),
            _ => Some(Step::Parallel(layer)),
        }
    }

    pub fn job_names(&self) -> Vec<&str> {
        match self {
            Step::Single(job) => vec![job.metadata().name()],
            Step::Parallel(jobs) => jobs.iter().map(|j| j.metadata().name()).collect(),
        }
    }

    fn execute(&self, pool: &PoolHandle) -> StepProgress {
        match self {
            Step::Single(job) => classify(job.metadata().name(), run_inline(job)),
            Step::Parallel(jobs) => {
                let Some((first, rest)) = jobs.split_first() else {
                    return StepProgress::Succeeded;
                };
                let submitted: Vec<JobFuture> =
                    rest.iter().map(|job| pool.submit(Arc::clone(job))).collect();

                match classify(first.metadata().name(), run_inline(first)) {
                    // Fail fast. Siblings already submitted keep running.
                    StepProgress::Failed(result) => StepProgress::Failed(result),
                    StepProgress::Succeeded => join(submitted),
                    StepProgress::InFlight(mut pending) => {
                        pending.extend(submitted);
                        StepProgress::InFlight(pending)
                    }
                }
            }
        }
    }
}

enum StepProgress {
    Succeeded,
    Failed(JobResult),
    InFlight(Vec<JobFuture>),
}

fn run_inline(job: &Arc<dyn RunnableJob>) -> JobResult {
    job.run().unwrap_or_else(JobResult::failure_from)
}

/// Anything but `SUCCESS` fails the step.
fn classify(name: &str, result: JobResult) -> StepProgress {
    match result.outcome() {
        JobOutcome::Success => StepProgress::Succeeded,
        JobOutcome::Yielded => match result.continuation() {
            Some(next) => StepProgress::InFlight(vec![next.clone()]),
            None => StepProgress::Failed(member_failed(name, result)),
        },
        _ => StepProgress::Failed(member_failed(name, result)),
    }
}

/// A step's in-flight set is done only when every future's whole chain has
/// a final result.
fn join(futures: Vec<JobFuture>) -> StepProgress {
    let Some(results) = futures.iter().map(final_result).collect::<Option<Vec<_>>>() else {
        return StepProgress::InFlight(futures);
    };
    match futures
        .iter()
        .zip(results)
        .find(|(_, result)| !result.is_success())
    {
        Some((future, result)) => StepProgress::Failed(member_failed(future.name(), result)),
        None => StepProgress::Succeeded,
    }
}

/// `None` while any attempt in the chain is pending. An attempt that
/// yielded after `latest()` looked at it also counts as pending.
fn final_result(future: &JobFuture) -> Option<JobResult> {
    future
        .latest()
        .try_result()
        .filter(|result| result.continuation().is_none())
}

fn member_failed(name: &str, result: JobResult) -> JobResult {
    let message = format!("Job '{name}' failed: {result}");
    result.into_failure(message)
}

/// A group registered as a job. Running it starts a fresh execution of all
/// steps; it finishes immediately or yields a continuation.
pub struct GroupJob {
    metadata: JobMetadata,
    steps: Vec<Step>,
    pool: PoolHandle,
    poll: Duration,
}

impl GroupJob {
    pub fn new(name: impl Into<String>, steps: Vec<Step>, pool: PoolHandle, poll: Duration) -> Self {
        Self {
            metadata: JobMetadata::new(name),
            steps,
            pool,
            poll,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl Job for GroupJob {
    fn metadata(&self) -> &JobMetadata {
        &self.metadata
    }

    fn run(&self, _params: &JobParams) -> anyhow::Result<Option<JobResult>> {
        let execution = GroupExecution {
            name: self.metadata.name().to_string(),
            pool: self.pool.clone(),
            poll: self.poll,
            remaining: self.steps.iter().cloned().collect(),
            in_flight: Vec::new(),
        };
        Ok(Some(execution.advance()))
    }
}

/// State of one group run, moved into each continuation.
struct GroupExecution {
    name: String,
    pool: PoolHandle,
    poll: Duration,
    remaining: VecDeque<Step>,
    in_flight: Vec<JobFuture>,
}

impl GroupExecution {
    fn advance(mut self) -> JobResult {
        if !self.in_flight.is_empty() {
            match join(std::mem::take(&mut self.in_flight)) {
                StepProgress::Succeeded => {}
                StepProgress::Failed(result) => return self.finish(result),
                StepProgress::InFlight(pending) => {
                    self.in_flight = pending;
                    return self.yield_now();
                }
            }
        }

        while let Some(step) = self.remaining.pop_front() {
            match step.execute(&self.pool) {
                StepProgress::Succeeded => {
                    debug!(group = %self.name, jobs = ?step.job_names(), "group step done");
                }
                StepProgress::Failed(result) => return self.finish(result),
                StepProgress::InFlight(pending) => {
                    self.in_flight = pending;
                    return self.yield_now();
                }
            }
        }
        self.finish(JobResult::success())
    }

    fn yield_now(self) -> JobResult {
        debug!(
            group = %self.name,
            waiting = self.in_flight.len(),
            steps_left = self.remaining.len(),
            "group yielded"
        );
        let pool = self.pool.clone();
        let name = self.name.clone();
        let poll = self.poll;
        let continuation = pool.submit_fn_after(name, poll, move || Ok(self.advance()));
        JobResult::yielded(continuation)
    }

    fn finish(&self, result: JobResult) -> JobResult {
        if result.is_success() {
            info!(group = %self.name, "group finished");
        } else {
            warn!(group = %self.name, result = %result, "group failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recorder {
        metadata: JobMetadata,
        params: JobParams,
        log: Arc<Mutex<Vec<String>>>,
        outcome: JobOutcome,
    }

    impl RunnableJob for Recorder {
        fn metadata(&self) -> &JobMetadata {
            &self.metadata
        }

        fn params(&self) -> &JobParams {
            &self.params
        }

        fn run(&self) -> anyhow::Result<JobResult> {
            self.log.lock().unwrap().push(self.metadata.name().to_string());
            match self.outcome {
                JobOutcome::Success => Ok(JobResult::success()),
                JobOutcome::Skipped => Ok(JobResult::skipped("busy")),
                _ => anyhow::bail!("{} broke", self.metadata.name()),
            }
        }
    }

    fn recorder(
        name: &str,
        outcome: JobOutcome,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn RunnableJob> {
        Arc::new(Recorder {
            metadata: JobMetadata::new(name),
            params: JobParams::new(),
            log: Arc::clone(log),
            outcome,
        })
    }

    fn run_group(pool: &WorkerPool, steps: Vec<Step>) -> JobResult {
        let group = GroupJob::new("g", steps, pool.handle().clone(), Duration::from_millis(5));
        let first = group.run(&JobParams::new()).unwrap().unwrap();
        match first.continuation() {
            Some(next) => next.get(),
            None => first,
        }
    }

    #[test]
    fn from_layer_shapes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(Step::from_layer(vec![]).is_none());
        assert!(matches!(
            Step::from_layer(vec![recorder("a", JobOutcome::Success, &log)]),
            Some(Step::Single(_))
        ));
        let parallel = Step::from_layer(vec![
            recorder("a", JobOutcome::Success, &log),
            recorder("b", JobOutcome::Success, &log),
        ])
        .unwrap();
        assert_eq!(parallel.job_names(), vec!["a", "b"]);
    }

    #[test]
    fn steps_run_in_order() {
        let pool = WorkerPool::new(2).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = run_group(
            &pool,
            vec![
                Step::Single(recorder("extract", JobOutcome::Success, &log)),
                Step::Parallel(vec![
                    recorder("transform-a", JobOutcome::Success, &log),
                    recorder("transform-b", JobOutcome::Success, &log),
                ]),
                Step::Single(recorder("load", JobOutcome::Success, &log)),
            ],
        );
        assert!(result.is_success(), "{result}");

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], "extract");
        assert_eq!(log[3], "load");
    }

    #[test]
    fn failed_step_stops_the_group() {
        let pool = WorkerPool::new(2).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = run_group(
            &pool,
            vec![
                Step::Single(recorder("extract", JobOutcome::Failure, &log)),
                Step::Single(recorder("load", JobOutcome::Success, &log)),
            ],
        );
        assert_eq!(result.outcome(), JobOutcome::Failure);
        assert!(result.message().unwrap().contains("Job 'extract' failed"));
        assert!(result.cause().is_some());
        assert_eq!(*log.lock().unwrap(), vec!["extract".to_string()]);
    }

    #[test]
    fn skipped_member_fails_the_group() {
        let pool = WorkerPool::new(1).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = run_group(
            &pool,
            vec![Step::Single(recorder("locked", JobOutcome::Skipped, &log))],
        );
        assert_eq!(result.outcome(), JobOutcome::Failure);
        assert!(result.message().unwrap().contains("SKIPPED"));
    }

    #[test]
    fn parallel_failure_is_attributed_and_siblings_finish() {
        let pool = WorkerPool::new(3).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = run_group(
            &pool,
            vec![Step::Parallel(vec![
                recorder("one", JobOutcome::Success, &log),
                recorder("two", JobOutcome::Failure, &log),
                recorder("three", JobOutcome::Success, &log),
            ])],
        );
        assert_eq!(result.outcome(), JobOutcome::Failure);
        assert!(result.message().unwrap().contains("Job 'two' failed"), "{result}");

        let mut ran = log.lock().unwrap().clone();
        ran.sort();
        assert_eq!(ran, vec!["one", "three", "two"]);
    }

    #[test]
    fn inline_failure_does_not_cancel_submitted_siblings() {
        let pool = WorkerPool::new(2).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(AtomicUsize::new(0));

        struct Slow(JobMetadata, JobParams, Arc<AtomicUsize>);
        impl RunnableJob for Slow {
            fn metadata(&self) -> &JobMetadata {
                &self.0
            }
            fn params(&self) -> &JobParams {
                &self.1
            }
            fn run(&self) -> anyhow::Result<JobResult> {
                std::thread::sleep(Duration::from_millis(50));
                self.2.fetch_add(1, Ordering::SeqCst);
                Ok(JobResult::success())
            }
        }

        let slow: Arc<dyn RunnableJob> = Arc::new(Slow(
            JobMetadata::new("slow"),
            JobParams::new(),
            Arc::clone(&finished),
        ));
        let result = run_group(
            &pool,
            vec![Step::Parallel(vec![recorder("first", JobOutcome::Failure, &log), slow])],
        );
        assert!(result.message().unwrap().contains("Job 'first' failed"));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while finished.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    fn resumed(
        pool: &WorkerPool,
        in_flight: JobFuture,
        next: Arc<dyn RunnableJob>,
    ) -> GroupExecution {
        GroupExecution {
            name: "outer".into(),
            pool: pool.handle().clone(),
            poll: Duration::from_millis(5),
            remaining: VecDeque::from(vec![Step::Single(next)]),
            in_flight: vec![in_flight],
        }
    }

    #[test]
    fn join_treats_a_yielded_attempt_as_in_flight() {
        let tail = JobFuture::pending("inner", Duration::ZERO);
        let head = JobFuture::ready("inner", JobResult::yielded(tail.clone()));
        assert!(head.is_done());
        assert!(matches!(join(vec![head.clone()]), StepProgress::InFlight(_)));

        tail.complete(JobResult::failure("inner broke"));
        match join(vec![head]) {
            StepProgress::Failed(result) => {
                assert!(result.message().unwrap().contains("Job 'inner' failed"));
            }
            _ => panic!("expected the inner failure"),
        }
    }

    #[test]
    fn next_step_waits_for_a_yielded_member() {
        let pool = WorkerPool::new(1).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tail = JobFuture::pending("inner", Duration::ZERO);
        let execution = resumed(
            &pool,
            JobFuture::ready("inner", JobResult::yielded(tail.clone())),
            recorder("load", JobOutcome::Success, &log),
        );

        let first = execution.advance();
        assert_eq!(first.outcome(), JobOutcome::Yielded);
        std::thread::sleep(Duration::from_millis(30));
        assert!(log.lock().unwrap().is_empty());

        tail.complete(JobResult::success());
        let result = first.continuation().unwrap().get();
        assert!(result.is_success(), "{result}");
        assert_eq!(*log.lock().unwrap(), vec!["load".to_string()]);
    }

    #[test]
    fn late_failure_of_a_yielded_member_fails_the_group() {
        let pool = WorkerPool::new(1).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tail = JobFuture::pending("inner", Duration::ZERO);
        let execution = resumed(
            &pool,
            JobFuture::ready("inner", JobResult::yielded(tail.clone())),
            recorder("load", JobOutcome::Success, &log),
        );

        let first = execution.advance();
        assert_eq!(first.outcome(), JobOutcome::Yielded);
        tail.complete(JobResult::failure("inner broke"));

        let result = first.continuation().unwrap().get();
        assert_eq!(result.outcome(), JobOutcome::Failure);
        assert!(result.message().unwrap().contains("Job 'inner' failed"));
        assert!(log.lock().unwrap().is_empty());
    }
}

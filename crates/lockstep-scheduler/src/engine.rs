use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lockstep_core::config::{LockstepConfig, TriggerConfig};
use lockstep_core::{Job, JobFuture, JobParams, JobResult, RunnableJob};
use lockstep_graph::{nodes_from_config, GraphBuilder, JobRef};
use lockstep_lock::{
    ClusterConnector, ClusterLockHandler, CompositeLockHandler, LocalLockHandler, LockHandler,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::group::{GroupJob, Step};
use crate::pool::WorkerPool;
use crate::runnable::{default_factory, RunnableJobFactory};
use crate::trigger::{self, TriggerDescriptor};

/// Assembles a [`Scheduler`] from config, registered jobs and an optional
/// cluster lock backend.
pub struct SchedulerBuilder {
    config: LockstepConfig,
    jobs: Vec<Arc<dyn Job>>,
    cluster: Option<Arc<dyn ClusterConnector>>,
    lock_handler: Option<Arc<dyn LockHandler>>,
}

impl SchedulerBuilder {
    pub fn new(config: LockstepConfig) -> Self {
        Self {
            config,
            jobs: Vec::new(),
            cluster: None,
            lock_handler: None,
        }
    }

    pub fn job(self, job: impl Job + 'static) -> Self {
        self.job_arc(Arc::new(job))
    }

    pub fn job_arc(mut self, job: Arc<dyn Job>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Serial jobs lock locally first, then through `connector`.
    pub fn cluster(mut self, connector: Arc<dyn ClusterConnector>) -> Self {
        self.cluster = Some(connector);
        self
    }

    /// Use `handler` instead of the one derived from config.
    pub fn lock_handler(mut self, handler: Arc<dyn LockHandler>) -> Self {
        self.lock_handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        let mut jobs: HashMap<String, Arc<dyn Job>> = HashMap::new();
        for job in self.jobs {
            let name = job.metadata().name().to_string();
            if jobs.insert(name.clone(), job).is_some() {
                return Err(SchedulerError::DuplicateJob { name });
            }
        }

        let lock = &self.config.lock;
        let lock_handler: Arc<dyn LockHandler> = match (self.lock_handler, self.cluster) {
            (Some(handler), _) => handler,
            (None, Some(connector)) => {
                let cluster = ClusterLockHandler::new(
                    connector,
                    lock.namespace.clone(),
                    Duration::from_millis(lock.cluster_wait_ms),
                );
                Arc::new(CompositeLockHandler::new(
                    LocalLockHandler::new(lock.namespace.clone()),
                    Arc::new(cluster),
                ))
            }
            (None, None) => Arc::new(LocalLockHandler::new(lock.namespace.clone())),
        };

        let graph = GraphBuilder::new(
            nodes_from_config(&self.config.jobs),
            jobs.values().map(|job| job.metadata().clone()),
        );
        let pool = WorkerPool::new(self.config.scheduler.threads)?;

        info!(
            jobs = jobs.len(),
            configured = self.config.jobs.len(),
            triggers = self.config.triggers.len(),
            "scheduler ready"
        );

        Ok(Scheduler {
            factory: default_factory(Arc::clone(&lock_handler)),
            lock_handler,
            pool,
            configured: self.config.jobs.keys().cloned().collect(),
            jobs,
            graph,
            triggers: self.config.triggers,
            yield_poll: Duration::from_millis(self.config.scheduler.yield_poll_ms),
            trigger_tasks: Mutex::new(Vec::new()),
        })
    }
}

/// Entry point for running jobs and groups, on demand or from triggers.
///
/// Run failures never surface as `Err`: [`Scheduler::run_once`] always
/// returns a future whose result says what happened.
pub struct Scheduler {
    pool: WorkerPool,
    jobs: HashMap<String, Arc<dyn Job>>,
    configured: Vec<String>,
    graph: GraphBuilder,
    factory: Arc<dyn RunnableJobFactory>,
    lock_handler: Arc<dyn LockHandler>,
    triggers: Vec<TriggerConfig>,
    yield_poll: Duration,
    trigger_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn builder(config: LockstepConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    /// Registered jobs plus top-level configured names, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.jobs.keys().chain(&self.configured).collect();
        names.into_iter().cloned().collect()
    }

    pub fn is_group(&self, name: &str) -> bool {
        self.graph.is_group(name)
    }

    /// Execution layers for `name`, dependencies first.
    pub fn plan(&self, name: &str) -> Result<Vec<Vec<JobRef>>> {
        if !self.graph.knows(name) {
            return Err(SchedulerError::UnknownJob {
                name: name.to_string(),
            });
        }
        Ok(self.graph.execution_plan(name)?)
    }

    pub fn run_once(&self, name: &str) -> JobFuture {
        self.run_once_with_params(name, JobParams::new())
    }

    /// Submit one run of `name` with run-time parameters.
    ///
    /// The root job receives every supplied parameter; other members of the
    /// plan only those they declare. Unknown names and configuration errors
    /// come back as an already-failed future and nothing is submitted.
    pub fn run_once_with_params(&self, name: &str, params: JobParams) -> JobFuture {
        if !self.graph.knows(name) {
            warn!(job = name, "run requested for unknown job");
            return JobFuture::ready(name, JobResult::failure("Invalid job name"));
        }
        match self.runnable_for(name, &params) {
            Ok(runnable) => {
                info!(job = name, "job submitted");
                self.pool.handle().submit(runnable)
            }
            Err(e) => {
                error!(job = name, error = %e, "job could not be prepared");
                JobFuture::ready(name, JobResult::failure_from(e.into()))
            }
        }
    }

    /// Validate every configured trigger, then start them all. Returns the
    /// number started; nothing is scheduled if any trigger is invalid.
    pub fn start(&self) -> Result<usize> {
        let mut tasks = self
            .trigger_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            warn!("triggers already started");
            return Ok(tasks.len());
        }
        if self.triggers.is_empty() {
            info!("no triggers configured");
            return Ok(0);
        }

        let mut prepared = Vec::with_capacity(self.triggers.len());
        for config in &self.triggers {
            let descriptor = TriggerDescriptor::from_config(config)?;
            if !self.graph.knows(&descriptor.job) {
                return Err(SchedulerError::UnknownJob {
                    name: descriptor.job,
                });
            }
            let runnable = self.runnable_for(&descriptor.job, &JobParams::new())?;
            prepared.push((descriptor, runnable));
        }

        for (descriptor, runnable) in prepared {
            info!(
                trigger = %descriptor.name,
                job = %descriptor.job,
                schedule = %descriptor.schedule,
                "trigger started"
            );
            tasks.push(trigger::spawn(self.pool.handle(), descriptor, runnable));
        }
        Ok(tasks.len())
    }

    /// Stop triggers, close the lock backend and stop the pool. Job bodies
    /// already running are not interrupted.
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self
            .trigger_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }
        self.lock_handler.shutdown();
        self.pool.shutdown();
    }

    fn runnable_for(&self, root: &str, overrides: &JobParams) -> Result<Arc<dyn RunnableJob>> {
        let plan = self.graph.execution_plan(root)?;
        let direct = plan.len() == 1 && plan[0].len() == 1 && !self.graph.is_group(root);

        let mut steps = Vec::with_capacity(plan.len());
        for layer in &plan {
            let members = layer
                .iter()
                .map(|job_ref| self.member(job_ref, root, overrides))
                .collect::<Result<Vec<_>>>()?;
            steps.extend(Step::from_layer(members));
        }

        if direct {
            if let Some(Step::Single(job)) = steps.pop() {
                return Ok(job);
            }
        }
        let group = GroupJob::new(root, steps, self.pool.handle().clone(), self.yield_poll);
        Ok(self.factory.runnable(Arc::new(group), JobParams::new()))
    }

    fn member(
        &self,
        job_ref: &JobRef,
        root: &str,
        overrides: &JobParams,
    ) -> Result<Arc<dyn RunnableJob>> {
        let job = self
            .jobs
            .get(job_ref.name())
            .ok_or_else(|| SchedulerError::UnknownJob {
                name: job_ref.name().to_string(),
            })?;
        let metadata = job.metadata();
        let is_root = job_ref.name() == root;

        let applicable: JobParams = overrides
            .iter()
            .filter(|(key, _)| is_root || metadata.param(key).is_some())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let mut params = job_ref.params().clone();
        params.extend(metadata.convert_params(applicable)?);

        Ok(self.factory.runnable(Arc::clone(job), params))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

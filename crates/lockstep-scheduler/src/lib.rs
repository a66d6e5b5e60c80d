//! `lockstep-scheduler` — runs jobs and job groups on a bounded worker pool.
//!
//! # Overview
//!
//! [`Scheduler`] resolves a job or group name into an execution plan, wraps
//! every member through the runnable factory chain (error isolation, locking,
//! logging) and submits the result to the [`WorkerPool`]. Multi-job plans run
//! as a [`GroupJob`] that yields instead of blocking while members are in
//! flight.
//!
//! # Triggers
//!
//! | Kind          | Behaviour                                              |
//! |---------------|--------------------------------------------------------|
//! | `cron`        | six-field [`CronExpression`], local time               |
//! | `fixed_delay` | wait the delay after each run settles                  |
//! | `fixed_rate`  | fire every period, skipping ticks missed by a long run |

pub mod cron;
pub mod engine;
pub mod error;
pub mod group;
pub mod pool;
pub mod runnable;
pub mod trigger;

pub use cron::CronExpression;
pub use engine::{Scheduler, SchedulerBuilder};
pub use error::{Result, SchedulerError};
pub use group::{GroupJob, Step};
pub use pool::{PoolHandle, WorkerPool};
pub use runnable::{
    default_factory, ErrorHandlingRunnableJobFactory, LockAwareRunnableJobFactory,
    RunnableJobFactory, SimpleRunnableJobFactory,
};
pub use trigger::{TriggerDescriptor, TriggerSchedule};

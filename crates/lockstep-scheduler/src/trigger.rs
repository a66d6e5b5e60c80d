//! Recurring triggers: cron, fixed delay and fixed rate.
//!
//! Each started trigger is one async task on the pool runtime. Firing
//! submits the job to the pool and waits for the whole run (continuations
//! included) without holding a worker thread.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use lockstep_core::config::TriggerConfig;
use lockstep_core::RunnableJob;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cron::CronExpression;
use crate::error::{Result, SchedulerError};
use crate::pool::PoolHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSchedule {
    /// Next fire time from the expression, evaluated in local time after
    /// each run finishes.
    Cron(CronExpression),
    /// Wait this long after each run finishes.
    FixedDelay(Duration),
    /// Fire on a fixed period; ticks missed while a run is still going are
    /// skipped.
    FixedRate(Duration),
}

impl fmt::Display for TriggerSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSchedule::Cron(expr) => write!(f, "cron '{expr}'"),
            TriggerSchedule::FixedDelay(d) => write!(f, "fixed delay {}ms", d.as_millis()),
            TriggerSchedule::FixedRate(d) => write!(f, "fixed rate {}ms", d.as_millis()),
        }
    }
}

/// A validated trigger ready to start.
#[derive(Debug, Clone)]
pub struct TriggerDescriptor {
    pub name: String,
    pub job: String,
    pub schedule: TriggerSchedule,
    pub initial_delay: Duration,
}

impl TriggerDescriptor {
    /// Exactly one of `cron`, `fixed_delay_ms` and `fixed_rate_ms` must be
    /// set. An unnamed trigger is named after its job.
    pub fn from_config(config: &TriggerConfig) -> Result<Self> {
        let name = if config.trigger.is_empty() {
            config.job.clone()
        } else {
            config.trigger.clone()
        };
        let invalid = |reason: &str| SchedulerError::InvalidTrigger {
            trigger: name.clone(),
            reason: reason.to_string(),
        };

        if config.job.is_empty() {
            return Err(invalid("no job given"));
        }

        let schedule = match (&config.cron, config.fixed_delay_ms, config.fixed_rate_ms) {
            (Some(cron), None, None) => TriggerSchedule::Cron(CronExpression::parse(cron)?),
            (None, Some(ms), None) => TriggerSchedule::FixedDelay(positive(ms, &invalid)?),
            (None, None, Some(ms)) => TriggerSchedule::FixedRate(positive(ms, &invalid)?),
            (None, None, None) => {
                return Err(invalid(
                    "one of cron, fixed_delay_ms or fixed_rate_ms is required",
                ))
            }
            _ => {
                return Err(invalid(
                    "only one of cron, fixed_delay_ms or fixed_rate_ms may be set",
                ))
            }
        };

        Ok(Self {
            name,
            job: config.job.clone(),
            schedule,
            initial_delay: Duration::from_millis(config.initial_delay_ms.unwrap_or(0)),
        })
    }
}

fn positive(ms: u64, invalid: &dyn Fn(&str) -> SchedulerError) -> Result<Duration> {
    if ms == 0 {
        return Err(invalid("period must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}

/// Start the trigger loop. Abort the returned handle to stop it.
pub(crate) fn spawn(
    pool: &PoolHandle,
    descriptor: TriggerDescriptor,
    job: Arc<dyn RunnableJob>,
) -> JoinHandle<()> {
    let pool_for_task = pool.clone();
    pool.spawn(async move {
        let TriggerDescriptor {
            name,
            schedule,
            initial_delay,
            ..
        } = descriptor;
        let pool = pool_for_task;

        if !initial_delay.is_zero() {
            tokio::time::sleep(initial_delay).await;
        }

        match schedule {
            TriggerSchedule::Cron(expr) => {
                let mut last_fire = None;
                loop {
                    let now = Local::now();
                    let from = match last_fire {
                        Some(last) if last > now => last,
                        _ => now,
                    };
                    let Some(next) = expr.next_in(&from) else {
                        warn!(trigger = %name, cron = %expr, "cron has no future fire time, trigger stopped");
                        return;
                    };
                    debug!(trigger = %name, next = %next, "next cron fire");
                    let wait = (next - Local::now()).to_std().unwrap_or_default();
                    tokio::time::sleep(wait).await;
                    last_fire = Some(next);
                    fire(&pool, &job, &name).await;
                }
            }
            TriggerSchedule::FixedDelay(delay) => loop {
                fire(&pool, &job, &name).await;
                tokio::time::sleep(delay).await;
            },
            TriggerSchedule::FixedRate(period) => {
                let mut ticks = tokio::time::interval(period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticks.tick().await;
                    fire(&pool, &job, &name).await;
                }
            }
        }
    })
}

async fn fire(pool: &PoolHandle, job: &Arc<dyn RunnableJob>, trigger: &str) {
    info!(trigger, job = job.metadata().name(), "trigger fired");
    let result = pool.submit(Arc::clone(job)).settled().await;
    if result.is_success() {
        debug!(trigger, result = %result, "triggered run finished");
    } else {
        warn!(trigger, result = %result, "triggered run did not succeed");
    }
}

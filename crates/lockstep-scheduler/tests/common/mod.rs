#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lockstep_core::config::LockstepConfig;
use lockstep_core::{FnJob, Job, JobMetadata, JobParams, JobResult};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn config(toml: &str) -> LockstepConfig {
    LockstepConfig::from_toml_str(toml).unwrap()
}

/// Job that counts its runs and succeeds.
pub fn counting(metadata: JobMetadata, runs: &Arc<AtomicUsize>) -> Arc<dyn Job> {
    let runs = Arc::clone(runs);
    Arc::new(FnJob::new(metadata, move |_: &JobParams| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(Some(JobResult::success()))
    }))
}

/// Job that always fails with an error.
pub fn failing(name: &str, runs: &Arc<AtomicUsize>) -> Arc<dyn Job> {
    let runs = Arc::clone(runs);
    let message = format!("{name} could not reach the database");
    Arc::new(FnJob::new(JobMetadata::new(name), move |_: &JobParams| {
        runs.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("{message}"))
    }))
}

/// Handle for a job that blocks until released.
pub struct Latch {
    started: Mutex<Receiver<()>>,
    release: Sender<()>,
}

impl Latch {
    pub fn wait_started(&self) {
        self.started.lock().unwrap().recv_timeout(WAIT).unwrap();
    }

    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

/// Job that counts its runs, signals that it started and then blocks until
/// the latch is released.
pub fn blocking(metadata: JobMetadata, runs: &Arc<AtomicUsize>) -> (Arc<dyn Job>, Latch) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let runs = Arc::clone(runs);

    let job = Arc::new(FnJob::new(metadata, move |_: &JobParams| {
        runs.fetch_add(1, Ordering::SeqCst);
        let _ = started_tx.send(());
        let _ = release_rx.lock().unwrap().recv_timeout(WAIT);
        Ok(Some(JobResult::success()))
    }));
    let latch = Latch {
        started: Mutex::new(started_rx),
        release: release_tx,
    };
    (job, latch)
}

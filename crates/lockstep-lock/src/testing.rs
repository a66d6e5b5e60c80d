use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lockstep_core::{JobMetadata, JobParams, JobResult, RunnableJob};

type Body = Box<dyn Fn() -> anyhow::Result<JobResult> + Send + Sync>;

/// Runnable that counts its invocations.
pub(crate) struct Probe {
    metadata: JobMetadata,
    params: JobParams,
    runs: AtomicUsize,
    body: Body,
}

impl Probe {
    pub(crate) fn new(
        name: &str,
        body: impl Fn() -> anyhow::Result<JobResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            metadata: JobMetadata::new(name).serial(),
            params: JobParams::new(),
            runs: AtomicUsize::new(0),
            body: Box::new(body),
        })
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl RunnableJob for Probe {
    fn metadata(&self) -> &JobMetadata {
        &self.metadata
    }

    fn params(&self) -> &JobParams {
        &self.params
    }

    fn run(&self) -> anyhow::Result<JobResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        (self.body)()
    }
}

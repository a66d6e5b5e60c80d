//! `JobFuture` — handle to one pool submission.
//!
//! A future completes exactly once. When the recorded result is `YIELDED` it
//! points at the continuation's future, so a run forms a chain of attempts;
//! [`JobFuture::get`] and [`JobFuture::settled`] walk that chain to the final
//! result while [`JobFuture::try_result`] only looks at this attempt.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{self, AtomicBool};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::types::JobResult;

struct FutureState {
    slot: Mutex<Option<JobResult>>,
    /// Wakes blocking waiters.
    ready: Condvar,
    /// Wakes async waiters.
    done: watch::Sender<bool>,
    cancelled: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

impl FutureState {
    fn slot(&self) -> MutexGuard<'_, Option<JobResult>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheaply cloneable handle; all clones observe the same completion.
#[derive(Clone)]
pub struct JobFuture {
    name: Arc<str>,
    state: Arc<FutureState>,
    fire_at: Instant,
}

impl JobFuture {
    /// A not-yet-completed future for work that starts after `delay`.
    pub fn pending(name: impl Into<String>, delay: Duration) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            name: Arc::from(name.into()),
            state: Arc::new(FutureState {
                slot: Mutex::new(None),
                ready: Condvar::new(),
                done,
                cancelled: AtomicBool::new(false),
                abort: Mutex::new(None),
            }),
            fire_at: Instant::now() + delay,
        }
    }

    /// An already-completed future, used when nothing is submitted.
    pub fn ready(name: impl Into<String>, result: JobResult) -> Self {
        let future = Self::pending(name, Duration::ZERO);
        future.complete(result);
        future
    }

    /// Record the result. Only the first completion wins; later ones (for
    /// example a task finishing after `cancel`) return `false`.
    pub fn complete(&self, result: JobResult) -> bool {
        {
            let mut slot = self.state.slot();
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
        }
        self.state.ready.notify_all();
        self.state.done.send_replace(true);
        true
    }

    /// Attach the pool task so `cancel` can try to stop it.
    pub fn set_abort_handle(&self, handle: AbortHandle) {
        *self
            .state
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this attempt has a result (possibly `YIELDED`).
    pub fn is_done(&self) -> bool {
        self.state.slot().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(atomic::Ordering::SeqCst)
    }

    /// This attempt's result, if any. Does not follow continuations.
    pub fn try_result(&self) -> Option<JobResult> {
        self.state.slot().clone()
    }

    fn next_link(&self) -> Option<JobFuture> {
        self.state
            .slot()
            .as_ref()
            .and_then(|r| r.continuation().cloned())
    }

    /// The newest attempt in the continuation chain: either still running or
    /// completed with a non-yielded result.
    pub fn latest(&self) -> JobFuture {
        let mut current = self.clone();
        while let Some(next) = current.next_link() {
            current = next;
        }
        current
    }

    /// Whether the whole chain has reached a final result.
    pub fn is_settled(&self) -> bool {
        self.latest().is_done()
    }

    fn wait_attempt(&self) -> JobResult {
        let slot = self.state.slot();
        let slot = self
            .state
            .ready
            .wait_while(slot, |s| s.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.clone().unwrap_or_else(JobResult::unknown)
    }

    fn wait_attempt_until(&self, deadline: Instant) -> Option<JobResult> {
        let slot = self.state.slot();
        let timeout = deadline.saturating_duration_since(Instant::now());
        let (slot, _) = self
            .state
            .ready
            .wait_timeout_while(slot, timeout, |s| s.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.clone()
    }

    /// Block until the final result, following yielded continuations.
    pub fn get(&self) -> JobResult {
        let mut current = self.clone();
        loop {
            let result = current.wait_attempt();
            match result.continuation().cloned() {
                Some(next) => current = next,
                None => return result,
            }
        }
    }

    /// Like [`get`](Self::get), giving up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<JobResult> {
        let deadline = Instant::now() + timeout;
        let mut current = self.clone();
        loop {
            let result = current.wait_attempt_until(deadline)?;
            match result.continuation().cloned() {
                Some(next) => current = next,
                None => return Some(result),
            }
        }
    }

    /// Async counterpart of [`get`](Self::get); never parks a thread.
    pub async fn settled(&self) -> JobResult {
        let mut current = self.clone();
        loop {
            let mut rx = current.state.done.subscribe();
            // The sender lives inside `current`, so the channel stays open.
            let _ = rx.wait_for(|done| *done).await;
            let result = current.try_result().unwrap_or_else(JobResult::unknown);
            match result.continuation().cloned() {
                Some(next) => current = next,
                None => return result,
            }
        }
    }

    /// Best-effort cancellation. A task that has not started will not run; a
    /// running job body is not interrupted, its result is simply discarded.
    ///
    /// A run that already yielded is cancelled at its newest attempt, which
    /// stops the chain from resuming.
    pub fn cancel(&self) -> bool {
        if !self.is_done() {
            self.state.cancelled.store(true, atomic::Ordering::SeqCst);
            if let Some(handle) = self
                .state
                .abort
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                handle.abort();
            }
            if self.complete(JobResult::unknown_with("Job cancelled")) {
                return true;
            }
        }
        self.next_link().is_some_and(|next| next.cancel())
    }

    /// Time left until the submission is due to start.
    pub fn delay(&self) -> Duration {
        self.fire_at.saturating_duration_since(Instant::now())
    }

    pub fn cmp_delay(&self, other: &JobFuture) -> Ordering {
        self.fire_at.cmp(&other.fire_at)
    }
}

impl fmt::Debug for JobFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFuture")
            .field("name", &self.name)
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobOutcome;

    #[test]
    fn first_completion_wins() {
        let f = JobFuture::pending("a", Duration::ZERO);
        assert!(!f.is_done());
        assert!(f.complete(JobResult::success()));
        assert!(!f.complete(JobResult::failure("late")));
        assert_eq!(f.get().outcome(), JobOutcome::Success);
    }

    #[test]
    fn get_follows_continuations() {
        let tail = JobFuture::pending("group", Duration::ZERO);
        let head = JobFuture::ready("group", JobResult::yielded(tail.clone()));

        assert_eq!(head.try_result().unwrap().outcome(), JobOutcome::Yielded);
        assert!(!head.is_settled());
        assert!(head.get_timeout(Duration::from_millis(20)).is_none());

        let waiter = {
            let head = head.clone();
            std::thread::spawn(move || head.get())
        };
        tail.complete(JobResult::failure("boom"));
        let result = waiter.join().unwrap();
        assert_eq!(result.outcome(), JobOutcome::Failure);
        assert!(head.is_settled());
    }

    #[test]
    fn cancel_completes_pending_future() {
        let f = JobFuture::pending("slow", Duration::from_secs(60));
        assert!(f.delay() > Duration::from_secs(50));
        assert!(f.cancel());
        assert!(f.is_cancelled());
        assert_eq!(f.get().message(), Some("Job cancelled"));
        assert!(!f.cancel());
    }

    #[test]
    fn cancel_reaches_the_pending_continuation() {
        let tail = JobFuture::pending("group", Duration::from_secs(60));
        let head = JobFuture::ready("group", JobResult::yielded(tail.clone()));
        assert!(head.cancel());
        assert!(tail.is_cancelled());

        let result = head.get();
        assert_eq!(result.outcome(), JobOutcome::Unknown);
        assert_eq!(result.message(), Some("Job cancelled"));
        assert!(!head.cancel());
    }

    #[test]
    fn cmp_delay_orders_by_fire_time() {
        let soon = JobFuture::pending("soon", Duration::from_millis(10));
        let later = JobFuture::pending("later", Duration::from_secs(10));
        assert_eq!(soon.cmp_delay(&later), Ordering::Less);
    }

    #[tokio::test]
    async fn settled_resolves_through_chain() {
        let tail = JobFuture::pending("group", Duration::ZERO);
        let head = JobFuture::ready("group", JobResult::yielded(tail.clone()));

        let completer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tail.complete(JobResult::success());
        });
        let result = head.settled().await;
        completer.await.unwrap();
        assert!(result.is_success());
    }
}

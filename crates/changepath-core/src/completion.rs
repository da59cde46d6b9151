//! Aggregation of body completions into the step's own outcome.
//!
//! Every issued body gets a one-shot [`BodyCallback`]. The tracker counts
//! outstanding callbacks and resolves the step's [`StepCompletion`] once the
//! start phase has sealed it and the count reaches zero. Hosts may fire
//! callbacks from any thread, including synchronously inside
//! `BodyInvoker::start`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BodyFailure, StepError};

/// Lifecycle of one step invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Collecting,
    Dispatching,
    AwaitingCompletions,
    Completed,
    Failed,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Completed | StepState::Failed)
    }
}

/// Summary of a completed step invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Paths dispatched, in discovery order. Empty for the default run.
    pub paths: Vec<String>,
    /// Body invocations requested from the host.
    pub requested: usize,
    /// Requests the host rejected at issue time.
    pub not_issued: usize,
    pub succeeded: usize,
    /// Callbacks dropped without reporting. Any beyond `not_issued` fail the
    /// step.
    pub abandoned: usize,
}

pub type StepOutcome = Result<StepReport, StepError>;

enum Report {
    Success,
    Failure(BodyFailure),
    Abandoned,
}

struct TrackerState {
    state: StepState,
    sealed: bool,
    outstanding: usize,
    report: StepReport,
    failures: Vec<BodyFailure>,
    sender: Option<oneshot::Sender<StepOutcome>>,
}

impl TrackerState {
    fn maybe_finish(&mut self) {
        if !self.sealed || self.outstanding > 0 || self.state.is_terminal() {
            return;
        }

        // Only the callbacks of rejected requests may be dropped unreported.
        let unaccounted = self.report.abandoned.saturating_sub(self.report.not_issued);
        let outcome = match self.failures.first() {
            Some(first) => Err(StepError::BodyFailed {
                failed: self.failures.len(),
                first: first.clone(),
            }),
            None if unaccounted > 0 => Err(StepError::BodyAbandoned { count: unaccounted }),
            None => Ok(self.report.clone()),
        };
        self.state = if outcome.is_ok() {
            StepState::Completed
        } else {
            StepState::Failed
        };

        info!(
            requested = self.report.requested,
            succeeded = self.report.succeeded,
            failed = self.failures.len(),
            abandoned = self.report.abandoned,
            "withChangeSets finished"
        );

        if let Some(sender) = self.sender.take() {
            // Receiver gone means nobody is waiting; nothing to do.
            let _ = sender.send(outcome);
        }
    }
}

/// Shared bookkeeping for one step invocation's callbacks.
pub struct CompletionTracker {
    inner: Mutex<TrackerState>,
}

impl CompletionTracker {
    pub(crate) fn new() -> (Arc<Self>, StepCompletion) {
        let (sender, receiver) = oneshot::channel();
        let tracker = Arc::new(Self {
            inner: Mutex::new(TrackerState {
                state: StepState::Collecting,
                sealed: false,
                outstanding: 0,
                report: StepReport::default(),
                failures: Vec::new(),
                sender: Some(sender),
            }),
        });
        (tracker, StepCompletion { receiver })
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> StepState {
        self.lock().state
    }

    pub(crate) fn transition(&self, state: StepState) {
        let mut inner = self.lock();
        if !inner.state.is_terminal() {
            inner.state = state;
        }
    }

    /// Hand out a callback for one body request.
    pub(crate) fn register(self: &Arc<Self>, invocation: Uuid) -> BodyCallback {
        let mut inner = self.lock();
        inner.outstanding += 1;
        inner.report.requested += 1;
        BodyCallback {
            tracker: Some(Arc::clone(self)),
            invocation,
        }
    }

    pub(crate) fn note_not_issued(&self) {
        self.lock().report.not_issued += 1;
    }

    /// End of the start phase: no further callbacks will be registered.
    pub(crate) fn seal(&self, paths: Vec<String>) {
        let mut inner = self.lock();
        inner.report.paths = paths;
        inner.sealed = true;
        if !inner.state.is_terminal() {
            inner.state = StepState::AwaitingCompletions;
        }
        inner.maybe_finish();
    }

    fn report(&self, report: Report) {
        let mut inner = self.lock();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        match report {
            Report::Success => inner.report.succeeded += 1,
            Report::Failure(failure) => inner.failures.push(failure),
            Report::Abandoned => inner.report.abandoned += 1,
        }
        inner.maybe_finish();
    }
}

/// One-shot completion handle for a single body invocation.
///
/// Dropping it without reporting counts the body as abandoned. For a request
/// the host rejected this only releases the step; for an accepted one the
/// step fails with [`StepError::BodyAbandoned`].
pub struct BodyCallback {
    tracker: Option<Arc<CompletionTracker>>,
    invocation: Uuid,
}

impl BodyCallback {
    pub fn invocation(&self) -> Uuid {
        self.invocation
    }

    pub fn on_success(mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.report(Report::Success);
        }
    }

    pub fn on_failure(mut self, failure: BodyFailure) {
        if let Some(tracker) = self.tracker.take() {
            warn!(invocation_id = %self.invocation, error = %failure, "Body failed");
            tracker.report(Report::Failure(failure));
        }
    }

    pub fn complete(self, result: Result<(), BodyFailure>) {
        match result {
            Ok(()) => self.on_success(),
            Err(failure) => self.on_failure(failure),
        }
    }
}

impl Drop for BodyCallback {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            warn!(invocation_id = %self.invocation, "Body callback dropped without a result");
            tracker.report(Report::Abandoned);
        }
    }
}

/// Resolves to the step's outcome once every issued body has reported.
#[derive(Debug)]
pub struct StepCompletion {
    receiver: oneshot::Receiver<StepOutcome>,
}

impl Future for StepCompletion {
    type Output = StepOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(StepError::CompletionLost)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_resolves_only_after_seal() {
        let (tracker, completion) = CompletionTracker::new();
        let callback = tracker.register(Uuid::new_v4());
        callback.on_success();
        assert_eq!(tracker.state(), StepState::Collecting);

        tracker.seal(vec!["a".to_string()]);
        assert_eq!(tracker.state(), StepState::Completed);
        let report = completion.now_or_never().expect("ready").expect("ok");
        assert_eq!(report.requested, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.paths, vec!["a"]);
    }

    #[test]
    fn test_waits_for_outstanding() {
        let (tracker, mut completion) = CompletionTracker::new();
        let first = tracker.register(Uuid::new_v4());
        let second = tracker.register(Uuid::new_v4());
        tracker.seal(Vec::new());
        assert_eq!(tracker.state(), StepState::AwaitingCompletions);

        first.on_success();
        assert!((&mut completion).now_or_never().is_none());
        second.on_success();
        assert!(completion.now_or_never().expect("ready").is_ok());
    }

    #[test]
    fn test_failure_propagates_after_all_report() {
        let (tracker, mut completion) = CompletionTracker::new();
        let first = tracker.register(Uuid::new_v4());
        let second = tracker.register(Uuid::new_v4());
        let third = tracker.register(Uuid::new_v4());
        tracker.seal(Vec::new());

        second.on_failure(BodyFailure::new("boom"));
        assert!((&mut completion).now_or_never().is_none());
        first.on_success();
        third.on_failure(BodyFailure::new("later"));

        assert_eq!(tracker.state(), StepState::Failed);
        let err = completion.now_or_never().expect("ready").expect_err("failed");
        assert_eq!(
            err,
            StepError::BodyFailed {
                failed: 2,
                first: BodyFailure::new("boom")
            }
        );
    }

    #[test]
    fn test_dropped_accepted_callback_fails_step() {
        let (tracker, completion) = CompletionTracker::new();
        let kept = tracker.register(Uuid::new_v4());
        drop(tracker.register(Uuid::new_v4()));
        tracker.seal(Vec::new());
        kept.on_success();

        assert_eq!(tracker.state(), StepState::Failed);
        let outcome = completion.now_or_never().expect("ready");
        assert_eq!(outcome, Err(StepError::BodyAbandoned { count: 1 }));
    }

    #[test]
    fn test_rejected_request_release_is_not_a_failure() {
        let (tracker, completion) = CompletionTracker::new();
        drop(tracker.register(Uuid::new_v4()));
        tracker.note_not_issued();
        tracker.seal(Vec::new());
        let report = completion.now_or_never().expect("ready").expect("ok");
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.not_issued, 1);
        assert_eq!(report.succeeded, 0);
    }

    #[test]
    fn test_body_failure_outranks_abandonment() {
        let (tracker, completion) = CompletionTracker::new();
        let failing = tracker.register(Uuid::new_v4());
        drop(tracker.register(Uuid::new_v4()));
        tracker.seal(Vec::new());
        failing.on_failure(BodyFailure::new("boom"));
        let err = completion.now_or_never().expect("ready").expect_err("failed");
        assert!(matches!(err, StepError::BodyFailed { failed: 1, .. }));
    }

    #[test]
    fn test_completion_lost_when_tracker_dropped() {
        let (tracker, completion) = CompletionTracker::new();
        drop(tracker);
        let outcome = completion.now_or_never().expect("ready");
        assert_eq!(outcome, Err(StepError::CompletionLost));
    }
}

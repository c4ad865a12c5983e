//! Retry lifecycle observers.
//!
//! Observers are notified when an attempt starts, when an attempt fails, and when the retry
//! sequence closes. They cannot influence control flow: a panicking observer is caught, logged,
//! and ignored so it never replaces the outcome of the call.

use crate::error::AttemptFailure;
use crate::state::RetryState;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Why a retry sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A response was returned to the caller.
    Succeeded,
    /// The policy declined another attempt after a failure.
    Exhausted,
    /// Selection failed; no retry was possible.
    Aborted,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Succeeded => write!(f, "succeeded"),
            CloseReason::Exhausted => write!(f, "exhausted"),
            CloseReason::Aborted => write!(f, "aborted"),
        }
    }
}

pub trait RetryObserver: Send + Sync + fmt::Debug {
    /// An endpoint is bound and the attempt is about to execute.
    fn on_attempt(&self, _service: &str, _state: &RetryState) {}

    /// The attempt failed and the failure has been recorded in `state`.
    fn on_failure(&self, _service: &str, _state: &RetryState, _failure: &AttemptFailure) {}

    fn on_close(&self, _service: &str, _state: &RetryState, _reason: CloseReason) {}
}

pub(crate) fn notify_all<F>(observers: &[Arc<dyn RetryObserver>], mut notify: F)
where
    F: FnMut(&dyn RetryObserver),
{
    for observer in observers {
        let result = catch_unwind(AssertUnwindSafe(|| notify(observer.as_ref())));
        if result.is_err() {
            tracing::warn!(
                target: "reroute::observer",
                observer = ?observer,
                "retry observer panicked; ignoring"
            );
        }
    }
}

/// Logs every lifecycle event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl RetryObserver for LoggingObserver {
    fn on_attempt(&self, service: &str, state: &RetryState) {
        let endpoint = state.endpoint().map(|e| e.to_string()).unwrap_or_default();
        tracing::info!(
            target: "reroute::observer",
            service,
            attempt = state.attempts() + 1,
            endpoint = %endpoint,
            "attempt started"
        );
    }

    fn on_failure(&self, service: &str, state: &RetryState, failure: &AttemptFailure) {
        tracing::info!(
            target: "reroute::observer",
            service,
            attempt = state.attempts(),
            error = %failure,
            "attempt failed"
        );
    }

    fn on_close(&self, service: &str, state: &RetryState, reason: CloseReason) {
        tracing::info!(
            target: "reroute::observer",
            service,
            failures = state.attempts(),
            reason = %reason,
            "retry sequence closed"
        );
    }
}

/// Lifecycle event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    AttemptStarted { service: String, attempt: usize, endpoint: Option<String> },
    AttemptFailed { service: String, attempt: usize, error: String },
    Closed { service: String, failures: usize, reason: CloseReason },
}

/// Keeps every event in memory; useful for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<RetryEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RetryEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: RetryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RetryObserver for RecordingObserver {
    fn on_attempt(&self, service: &str, state: &RetryState) {
        self.push(RetryEvent::AttemptStarted {
            service: service.to_string(),
            attempt: state.attempts() + 1,
            endpoint: state.endpoint().map(|e| e.authority()),
        });
    }

    fn on_failure(&self, service: &str, state: &RetryState, failure: &AttemptFailure) {
        self.push(RetryEvent::AttemptFailed {
            service: service.to_string(),
            attempt: state.attempts(),
            error: failure.to_string(),
        });
    }

    fn on_close(&self, service: &str, state: &RetryState, reason: CloseReason) {
        self.push(RetryEvent::Closed {
            service: service.to_string(),
            failures: state.attempts(),
            reason,
        });
    }
}

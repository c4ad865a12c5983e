//! Per-invocation retry bookkeeping.

use crate::endpoint::ServiceEndpoint;
use crate::error::AttemptFailure;
use crate::request::{OutboundRequest, Response};
use std::sync::Arc;

/// Mutable record of one logical call's attempts.
///
/// Owned by exactly one invocation and passed by reference into every step of the retry
/// loop. Holds at most one endpoint: a same-endpoint retry keeps it, a next-endpoint retry
/// clears it so the selector is asked again.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: usize,
    endpoint: Option<Arc<ServiceEndpoint>>,
    last_failure: Option<AttemptFailure>,
    request: Arc<OutboundRequest>,
}

impl RetryState {
    pub fn new(request: Arc<OutboundRequest>) -> Self {
        Self { attempts: 0, endpoint: None, last_failure: None, request }
    }

    /// Number of failures recorded so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn endpoint(&self) -> Option<&Arc<ServiceEndpoint>> {
        self.endpoint.as_ref()
    }

    pub fn last_failure(&self) -> Option<&AttemptFailure> {
        self.last_failure.as_ref()
    }

    pub fn request(&self) -> &OutboundRequest {
        &self.request
    }

    /// True before the first attempt has been made.
    pub fn is_fresh(&self) -> bool {
        self.attempts == 0 && self.endpoint.is_none()
    }

    pub(crate) fn bind(&mut self, endpoint: Arc<ServiceEndpoint>) {
        self.endpoint = Some(endpoint);
    }

    pub(crate) fn clear_endpoint(&mut self) -> Option<Arc<ServiceEndpoint>> {
        self.endpoint.take()
    }

    pub(crate) fn record(&mut self, failure: AttemptFailure) {
        self.attempts += 1;
        self.last_failure = Some(failure);
    }
}

/// Result of one classified attempt.
///
/// A response whose status the policy marks retryable is never `Success`; it has already been
/// buffered into an [`AttemptFailure::RetryableStatus`].
#[derive(Debug)]
pub enum Outcome {
    Success(Response),
    Failure(AttemptFailure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

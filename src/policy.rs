//! Retry decision policies.
//!
//! A policy instance is created per invocation (see [`RetryFactory`](crate::RetryFactory)) and
//! answers three questions about the current [`RetryState`]: may we try the same endpoint
//! again, may we move to the next endpoint, and does this status code count as a failure.
//! Policies keep their own counters through interior mutability; they never modify the state.

use crate::error::AttemptFailure;
use crate::retry_context::DynEq;
use crate::state::RetryState;
use http::{Method, StatusCode};
use std::collections::BTreeSet;
use std::sync::Mutex;

pub trait RetryDecisionPolicy: DynEq + Send + Sync + std::fmt::Debug {
    /// Whether the endpoint that just failed should be tried again.
    fn can_retry_same_endpoint(&self, state: &RetryState) -> bool;

    /// Whether a fresh endpoint should be selected and tried.
    fn can_retry_next_endpoint(&self, state: &RetryState) -> bool;

    /// Whether a received response with `status` should be treated as a failure.
    fn is_retryable_status(&self, status: StatusCode) -> bool;

    /// Called once per recorded failure, after the state has been updated.
    fn on_failure(&self, state: &RetryState, failure: &AttemptFailure);

    /// Called exactly once when the sequence ends, whatever the outcome.
    fn on_close(&self, _state: &RetryState) {}
}

/// Never retries and never classifies a status as a failure.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NeverRetryPolicy;

impl RetryDecisionPolicy for NeverRetryPolicy {
    fn can_retry_same_endpoint(&self, _state: &RetryState) -> bool {
        false
    }

    fn can_retry_next_endpoint(&self, _state: &RetryState) -> bool {
        false
    }

    fn is_retryable_status(&self, _status: StatusCode) -> bool {
        false
    }

    fn on_failure(&self, _state: &RetryState, _failure: &AttemptFailure) {}
}

/// Errors produced while building a [`BudgetRetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyBuildError {
    #[error("invalid retryable status code {0}")]
    InvalidStatusCode(u16),
}

#[derive(Debug, Default)]
struct Counters {
    same: usize,
    next: usize,
    last_charged_same: bool,
}

/// Budget-based policy: a number of retries on the same endpoint, then a number of switches to
/// another endpoint.
///
/// Each failure is charged to the same-endpoint budget while it has room; otherwise it is
/// charged to the next-endpoint budget and the same-endpoint count starts over for the new
/// endpoint. A call therefore makes at most `(1 + same) * (1 + next)` attempts.
///
/// Only `GET` requests are retried unless `retry_on_all_methods` is set, since other methods
/// may not be safe to replay.
#[derive(Debug)]
pub struct BudgetRetryPolicy {
    max_same_endpoint: usize,
    max_next_endpoint: usize,
    retry_on_all_methods: bool,
    retryable_statuses: BTreeSet<StatusCode>,
    counters: Mutex<Counters>,
}

impl BudgetRetryPolicy {
    /// Create a builder with one next-endpoint retry and no same-endpoint retries.
    pub fn builder() -> BudgetRetryPolicyBuilder {
        BudgetRetryPolicyBuilder::default()
    }

    /// Configured same-endpoint retry budget.
    pub fn max_same_endpoint(&self) -> usize {
        self.max_same_endpoint
    }

    /// Configured next-endpoint retry budget.
    pub fn max_next_endpoint(&self) -> usize {
        self.max_next_endpoint
    }

    /// Same configuration with zeroed counters.
    pub fn fresh(&self) -> Self {
        Self {
            max_same_endpoint: self.max_same_endpoint,
            max_next_endpoint: self.max_next_endpoint,
            retry_on_all_methods: self.retry_on_all_methods,
            retryable_statuses: self.retryable_statuses.clone(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn method_allowed(&self, state: &RetryState) -> bool {
        self.retry_on_all_methods || state.request().method() == Method::GET
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().expect("retry budget counters poisoned")
    }
}

impl PartialEq for BudgetRetryPolicy {
    fn eq(&self, other: &Self) -> bool {
        self.max_same_endpoint == other.max_same_endpoint
            && self.max_next_endpoint == other.max_next_endpoint
            && self.retry_on_all_methods == other.retry_on_all_methods
            && self.retryable_statuses == other.retryable_statuses
    }
}

impl RetryDecisionPolicy for BudgetRetryPolicy {
    fn can_retry_same_endpoint(&self, state: &RetryState) -> bool {
        self.method_allowed(state) && self.counters().last_charged_same
    }

    fn can_retry_next_endpoint(&self, state: &RetryState) -> bool {
        self.method_allowed(state) && self.counters().next <= self.max_next_endpoint
    }

    fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status)
    }

    fn on_failure(&self, _state: &RetryState, _failure: &AttemptFailure) {
        let mut counters = self.counters();
        if counters.same < self.max_same_endpoint {
            counters.same += 1;
            counters.last_charged_same = true;
        } else {
            counters.next += 1;
            counters.same = 0;
            counters.last_charged_same = false;
        }
    }
}

/// Builder for [`BudgetRetryPolicy`].
#[derive(Debug, Clone)]
pub struct BudgetRetryPolicyBuilder {
    max_same_endpoint: usize,
    max_next_endpoint: usize,
    retry_on_all_methods: bool,
    retryable_statuses: Vec<u16>,
}

impl Default for BudgetRetryPolicyBuilder {
    fn default() -> Self {
        Self {
            max_same_endpoint: 0,
            max_next_endpoint: 1,
            retry_on_all_methods: false,
            retryable_statuses: Vec::new(),
        }
    }
}

impl BudgetRetryPolicyBuilder {
    /// Set how many times the same endpoint may be retried.
    pub fn max_same_endpoint(mut self, retries: usize) -> Self {
        self.max_same_endpoint = retries;
        self
    }

    /// Set how many times a different endpoint may be tried.
    pub fn max_next_endpoint(mut self, retries: usize) -> Self {
        self.max_next_endpoint = retries;
        self
    }

    /// Retry every method, not only `GET`.
    pub fn retry_on_all_methods(mut self, enabled: bool) -> Self {
        self.retry_on_all_methods = enabled;
        self
    }

    /// Add a status code that counts as a failure.
    pub fn retryable_status(mut self, code: u16) -> Self {
        self.retryable_statuses.push(code);
        self
    }

    /// Add several status codes that count as failures.
    pub fn retryable_statuses<I: IntoIterator<Item = u16>>(mut self, codes: I) -> Self {
        self.retryable_statuses.extend(codes);
        self
    }

    /// Build the policy, validating every status code.
    pub fn build(self) -> Result<BudgetRetryPolicy, PolicyBuildError> {
        let retryable_statuses = self
            .retryable_statuses
            .into_iter()
            .map(|code| {
                StatusCode::from_u16(code).map_err(|_| PolicyBuildError::InvalidStatusCode(code))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(BudgetRetryPolicy {
            max_same_endpoint: self.max_same_endpoint,
            max_next_endpoint: self.max_next_endpoint,
            retry_on_all_methods: self.retry_on_all_methods,
            retryable_statuses,
            counters: Mutex::new(Counters::default()),
        })
    }
}

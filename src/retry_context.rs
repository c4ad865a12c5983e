//! Bridges the orchestrator's attempt loop to a [`RetryDecisionPolicy`].
//!
//! The adapter owns the lifecycle of a [`RetryState`] (open, record failure, close), answers
//! "may we attempt again", and performs endpoint selection whenever no endpoint is bound.

use crate::endpoint::ServiceEndpoint;
use crate::error::{AttemptFailure, LoadBalancerError};
use crate::policy::RetryDecisionPolicy;
use crate::request::OutboundRequest;
use crate::selector::InstanceSelector;
use crate::state::RetryState;
use std::any::Any;
use std::sync::Arc;

/// Value equality across trait objects.
///
/// Implemented for every `PartialEq + 'static` type, so selectors and policies only need to
/// derive or implement `PartialEq`.
pub trait DynEq: Any {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: PartialEq + Any> DynEq for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|other| self == other)
    }
}

/// Retry context for one service name and one request.
#[derive(Debug, Clone)]
pub struct RetryContextAdapter {
    request: Arc<OutboundRequest>,
    policy: Arc<dyn RetryDecisionPolicy>,
    selector: Arc<dyn InstanceSelector>,
    service_name: String,
}

impl RetryContextAdapter {
    pub fn new(
        request: Arc<OutboundRequest>,
        policy: Arc<dyn RetryDecisionPolicy>,
        selector: Arc<dyn InstanceSelector>,
        service_name: impl Into<String>,
    ) -> Self {
        Self { request, policy, selector, service_name: service_name.into() }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn policy(&self) -> &dyn RetryDecisionPolicy {
        self.policy.as_ref()
    }

    /// Fresh state for this request: no endpoint, zero attempts.
    pub fn open(&self) -> RetryState {
        RetryState::new(self.request.clone())
    }

    /// Always true before the first attempt; afterwards the policy's next-endpoint answer.
    pub fn should_attempt(&self, state: &RetryState) -> bool {
        if state.is_fresh() {
            return true;
        }
        self.policy.can_retry_next_endpoint(state)
    }

    /// Reuse the bound endpoint, or select and bind a new one.
    pub async fn bind_endpoint(
        &self,
        state: &mut RetryState,
    ) -> Result<Arc<ServiceEndpoint>, LoadBalancerError> {
        if let Some(endpoint) = state.endpoint() {
            tracing::debug!(
                target: "reroute::retry",
                service = %self.service_name,
                endpoint = %endpoint,
                "reusing bound endpoint"
            );
            return Ok(endpoint.clone());
        }
        let endpoint = self.selector.choose(&self.service_name).await.ok_or_else(|| {
            LoadBalancerError::NoInstanceAvailable { service: self.service_name.clone() }
        })?;
        tracing::debug!(
            target: "reroute::retry",
            service = %self.service_name,
            endpoint = %endpoint,
            "selected endpoint"
        );
        state.bind(endpoint.clone());
        Ok(endpoint)
    }

    /// Count the failure, keep it as the latest cause, and tell the policy.
    pub fn record_failure(&self, state: &mut RetryState, failure: AttemptFailure) {
        state.record(failure);
        if let Some(recorded) = state.last_failure() {
            self.policy.on_failure(state, recorded);
        }
    }

    pub fn close(&self, state: &RetryState) {
        self.policy.on_close(state);
    }
}

impl PartialEq for RetryContextAdapter {
    fn eq(&self, other: &Self) -> bool {
        self.request == other.request
            && self.service_name == other.service_name
            && (*self.policy).dyn_eq((*other.policy).as_any())
            && (*self.selector).dyn_eq((*other.selector).as_any())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::policy::{BudgetRetryPolicy, NeverRetryPolicy};
    use crate::selector::RoundRobinSelector;
    use http::Uri;

    fn request() -> Arc<OutboundRequest> {
        Arc::new(OutboundRequest::get(Uri::from_static("http://orders/items")))
    }

    fn selector() -> Arc<dyn InstanceSelector> {
        Arc::new(
            RoundRobinSelector::new()
                .with_service("orders", vec![ServiceEndpoint::new("orders", "a", 80)]),
        )
    }

    fn adapter(policy: Arc<dyn RetryDecisionPolicy>) -> RetryContextAdapter {
        RetryContextAdapter::new(request(), policy, selector(), "orders")
    }

    #[test]
    fn first_attempt_always_allowed() {
        let ctx = adapter(Arc::new(NeverRetryPolicy));
        let state = ctx.open();
        assert_eq!(state.attempts(), 0);
        assert!(ctx.should_attempt(&state));
    }

    #[test]
    fn later_attempts_defer_to_policy() {
        let ctx = adapter(Arc::new(NeverRetryPolicy));
        let mut state = ctx.open();
        ctx.record_failure(&mut state, TransportError::connect("refused").into());
        assert_eq!(state.attempts(), 1);
        assert!(!ctx.should_attempt(&state));
    }

    #[tokio::test]
    async fn bind_endpoint_reuses_existing_binding() {
        let ctx = adapter(Arc::new(NeverRetryPolicy));
        let mut state = ctx.open();
        let first = ctx.bind_endpoint(&mut state).await.unwrap();
        let second = ctx.bind_endpoint(&mut state).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!state.is_fresh());
    }

    #[tokio::test]
    async fn bind_endpoint_reports_missing_instances() {
        let ctx = RetryContextAdapter::new(
            request(),
            Arc::new(NeverRetryPolicy),
            Arc::new(RoundRobinSelector::new()),
            "orders",
        );
        let mut state = ctx.open();
        let err = ctx.bind_endpoint(&mut state).await.unwrap_err();
        assert!(err.is_no_instance());
        assert!(state.endpoint().is_none());
    }

    #[test]
    fn equality_is_structural() {
        let a = adapter(Arc::new(BudgetRetryPolicy::builder().build().unwrap()));
        let b = adapter(Arc::new(BudgetRetryPolicy::builder().build().unwrap()));
        assert_eq!(a, b);

        let different_policy = adapter(Arc::new(NeverRetryPolicy));
        assert_ne!(a, different_policy);

        let different_name =
            RetryContextAdapter::new(request(), Arc::new(NeverRetryPolicy), selector(), "billing");
        assert_ne!(different_policy, different_name);
    }
}

//! Convenient re-exports for wiring a client.
pub use crate::{
    backoff::{Backoff, BackoffStrategy},
    client::{LoadBalancerClient, LoadBalancerLayer},
    config::{PropertiesRetryFactory, RetryFactory, RetryProperties},
    endpoint::ServiceEndpoint,
    error::{LoadBalancerError, TransportError},
    jitter::Jitter,
    observer::RetryObserver,
    policy::{BudgetRetryPolicy, RetryDecisionPolicy},
    request::{BoundRequest, OutboundRequest, Response},
    selector::{InstanceSelector, RoundRobinSelector},
    transport::Transport,
};

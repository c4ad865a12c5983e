#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # reroute
//!
//! Retrying load-balanced HTTP calls: pick an endpoint for a logical service name, execute,
//! and on failure either retry the same endpoint or move on to the next one, as the
//! per-service policy allows.
//!
//! ## Features
//!
//! - **Logical addressing**: the request URI host is the service name; the chosen endpoint's
//!   scheme, host and port are substituted before sending
//! - **Two retry dimensions**: same-endpoint and next-endpoint budgets per service
//! - **Status-code classification**: retryable responses are buffered, released, and retried
//! - **Pluggable seams**: [`InstanceSelector`], [`Transport`], [`RetryFactory`],
//!   [`RetryObserver`], [`Recovery`]
//! - **tower integration**: [`LoadBalancerClient`] is a `Service<OutboundRequest>` and
//!   [`LoadBalancerLayer`] wraps any `Service<BoundRequest>` transport
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use http::{StatusCode, Uri};
//! use reroute::{
//!     BoundRequest, LoadBalancerClient, OutboundRequest, PropertiesRetryFactory, Response,
//!     RetryProperties, RoundRobinSelector, ServiceEndpoint, Transport, TransportError,
//! };
//!
//! #[derive(Debug)]
//! struct Loopback;
//!
//! #[async_trait]
//! impl Transport for Loopback {
//!     async fn send(&self, request: BoundRequest) -> Result<Response, TransportError> {
//!         Ok(Response::from_bytes(StatusCode::OK, request.uri.to_string()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let selector = RoundRobinSelector::new()
//!         .with_service("orders", vec![ServiceEndpoint::new("orders", "10.0.0.7", 8080)]);
//!     let client = LoadBalancerClient::builder()
//!         .selector(selector)
//!         .transport(Loopback)
//!         .retry_factory(PropertiesRetryFactory::new(&RetryProperties::default()).unwrap())
//!         .build()
//!         .unwrap();
//!
//!     let response = client
//!         .execute(OutboundRequest::get(Uri::from_static("http://orders/items?page=2")))
//!         .await
//!         .unwrap();
//!     let body = response.buffer().await.unwrap().body;
//!     assert_eq!(body, "http://10.0.0.7:8080/items?page=2");
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod jitter;
pub mod observer;
pub mod orchestrator;
pub mod passthrough;
pub mod pipeline;
pub mod policy;
pub mod prelude;
pub mod recovery;
pub mod request;
pub mod retry_context;
pub mod selector;
pub mod sleeper;
pub mod state;
pub mod transport;

// Re-exports
pub use backoff::{Backoff, BackoffError, BackoffStrategy};
pub use client::{LoadBalancerClient, LoadBalancerClientBuilder, LoadBalancerLayer};
pub use config::{
    BackoffProperties, PropertiesRetryFactory, RetryFactory, RetryProperties,
    ServiceRetryProperties,
};
pub use endpoint::ServiceEndpoint;
pub use error::{
    AttemptFailure, LoadBalancerError, RetryableStatusFailure, TransportError, TransportErrorKind,
};
pub use jitter::Jitter;
pub use observer::{CloseReason, LoggingObserver, RecordingObserver, RetryEvent, RetryObserver};
pub use orchestrator::{BuildError, RetryOrchestrator, RetryOrchestratorBuilder};
pub use passthrough::PassthroughExecutor;
pub use pipeline::{HeaderTransformer, InstanceIdHeader, RequestPipeline, RequestTransformer};
pub use policy::{
    BudgetRetryPolicy, BudgetRetryPolicyBuilder, NeverRetryPolicy, PolicyBuildError,
    RetryDecisionPolicy,
};
pub use recovery::{Recovery, ReturnLastResponse};
pub use request::{BodyStream, BoundRequest, BufferedResponse, OutboundRequest, Response};
pub use retry_context::{DynEq, RetryContextAdapter};
pub use selector::{InstanceSelector, RoundRobinSelector};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use state::{Outcome, RetryState};
pub use transport::{ServiceTransport, Transport};

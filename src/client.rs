//! Client entry point and tower integration.
//!
//! [`LoadBalancerClient`] picks the retrying or the single-attempt path once, at build time.
//! It is also a `tower::Service<OutboundRequest>`, and [`LoadBalancerLayer`] builds one around
//! any tower service that can send a [`BoundRequest`].

use crate::config::RetryFactory;
use crate::error::{LoadBalancerError, TransportError};
use crate::jitter::Jitter;
use crate::orchestrator::{BuildError, RetryOrchestrator, RetrySettings};
use crate::passthrough::PassthroughExecutor;
use crate::pipeline::{RequestPipeline, RequestTransformer};
use crate::recovery::Recovery;
use crate::request::{BoundRequest, OutboundRequest, Response};
use crate::selector::InstanceSelector;
use crate::sleeper::Sleeper;
use crate::transport::{ServiceTransport, Transport};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

#[derive(Debug, Clone)]
enum Mode {
    Retrying(Arc<RetryOrchestrator>),
    Passthrough(Arc<PassthroughExecutor>),
}

/// Load-balanced client over a selector and a transport.
#[derive(Debug, Clone)]
pub struct LoadBalancerClient {
    mode: Mode,
}

impl LoadBalancerClient {
    /// Create a builder with retries on and no collaborators set.
    pub fn builder() -> LoadBalancerClientBuilder {
        LoadBalancerClientBuilder::new()
    }

    /// True when calls go through the retry loop.
    pub fn retries_enabled(&self) -> bool {
        matches!(self.mode, Mode::Retrying(_))
    }

    /// Execute `request` on the retrying or single-attempt path chosen at build time.
    pub async fn execute(&self, request: OutboundRequest) -> Result<Response, LoadBalancerError> {
        match &self.mode {
            Mode::Retrying(orchestrator) => orchestrator.execute(request).await,
            Mode::Passthrough(executor) => executor.execute(request).await,
        }
    }
}

impl Service<OutboundRequest> for LoadBalancerClient {
    type Response = Response;
    type Error = LoadBalancerError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: OutboundRequest) -> Self::Future {
        let client = self.clone();
        Box::pin(async move { client.execute(request).await })
    }
}

/// Builder for [`LoadBalancerClient`].
///
/// Retries are used only when a [`RetryFactory`] is supplied, `retry_enabled` is left on, and
/// the factory itself reports retries as enabled.
pub struct LoadBalancerClientBuilder {
    selector: Option<Arc<dyn InstanceSelector>>,
    transport: Option<Arc<dyn Transport>>,
    transformers: Vec<Arc<dyn RequestTransformer>>,
    factory: Option<Arc<dyn RetryFactory>>,
    retry_enabled: bool,
    jitter: Jitter,
    sleeper: Option<Arc<dyn Sleeper>>,
    recovery: Option<Arc<dyn Recovery>>,
}

impl fmt::Debug for LoadBalancerClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancerClientBuilder")
            .field("selector", &self.selector)
            .field("transport", &self.transport)
            .field("transformers", &self.transformers.len())
            .field("factory", &self.factory)
            .field("retry_enabled", &self.retry_enabled)
            .finish_non_exhaustive()
    }
}

impl LoadBalancerClientBuilder {
    /// Create a builder with retries on, no jitter and the tokio sleeper.
    pub fn new() -> Self {
        Self {
            selector: None,
            transport: None,
            transformers: Vec::new(),
            factory: None,
            retry_enabled: true,
            jitter: Jitter::None,
            sleeper: None,
            recovery: None,
        }
    }

    /// Set the instance selector. Required.
    pub fn selector<S>(mut self, selector: S) -> Self
    where
        S: InstanceSelector + 'static,
    {
        self.selector = Some(Arc::new(selector));
        self
    }

    /// Set a selector that is already shared elsewhere.
    pub fn shared_selector(mut self, selector: Arc<dyn InstanceSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Set the transport. Required for `build`.
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Append a request transformer; transformers run in registration order.
    pub fn with_transformer<T>(mut self, transformer: T) -> Self
    where
        T: RequestTransformer + 'static,
    {
        self.transformers.push(Arc::new(transformer));
        self
    }

    /// Set the per-service retry factory. Without one, calls are never retried.
    pub fn retry_factory<F>(mut self, factory: F) -> Self
    where
        F: RetryFactory + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Global switch; off forces the single-attempt path even with a factory.
    pub fn retry_enabled(mut self, enabled: bool) -> Self {
        self.retry_enabled = enabled;
        self
    }

    /// Set the jitter applied on top of the service's backoff.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Turn exhausted failures into responses.
    pub fn with_recovery<R>(mut self, recovery: R) -> Self
    where
        R: Recovery + 'static,
    {
        self.recovery = Some(Arc::new(recovery));
        self
    }

    /// Everything but the transport, as a tower layer.
    pub fn into_layer(self) -> Result<LoadBalancerLayer, BuildError> {
        let selector = self.selector.ok_or(BuildError::MissingSelector)?;
        let retry = match self.factory {
            Some(factory) if self.retry_enabled && factory.retry_enabled() => {
                let mut settings = RetrySettings::new(factory);
                settings.jitter = self.jitter;
                if let Some(sleeper) = self.sleeper {
                    settings.sleeper = sleeper;
                }
                settings.recovery = self.recovery;
                Some(settings)
            }
            _ => None,
        };
        Ok(LoadBalancerLayer { selector, transformers: self.transformers, retry })
    }

    /// Build the client, checking that a selector and a transport are set.
    pub fn build(mut self) -> Result<LoadBalancerClient, BuildError> {
        let transport = self.transport.take().ok_or(BuildError::MissingTransport)?;
        Ok(self.into_layer()?.assemble(transport))
    }
}

impl Default for LoadBalancerClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a `Service<BoundRequest>` transport into a [`LoadBalancerClient`].
#[derive(Clone)]
pub struct LoadBalancerLayer {
    selector: Arc<dyn InstanceSelector>,
    transformers: Vec<Arc<dyn RequestTransformer>>,
    retry: Option<RetrySettings>,
}

impl fmt::Debug for LoadBalancerLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancerLayer")
            .field("selector", &self.selector)
            .field("transformers", &self.transformers.len())
            .field("retry", &self.retry.is_some())
            .finish()
    }
}

impl LoadBalancerLayer {
    fn assemble(&self, transport: Arc<dyn Transport>) -> LoadBalancerClient {
        let pipeline = RequestPipeline::from_parts(transport, self.transformers.clone());
        let selector = self.selector.clone();
        let mode = match &self.retry {
            Some(settings) => Mode::Retrying(Arc::new(RetryOrchestrator::from_parts(
                selector,
                pipeline,
                settings.clone(),
            ))),
            None => Mode::Passthrough(Arc::new(PassthroughExecutor::new(selector, pipeline))),
        };
        LoadBalancerClient { mode }
    }
}

impl<S> Layer<S> for LoadBalancerLayer
where
    S: Service<BoundRequest, Response = Response, Error = TransportError>
        + Clone
        + Send
        + Sync
        + fmt::Debug
        + 'static,
    S::Future: Send,
{
    type Service = LoadBalancerClient;

    fn layer(&self, inner: S) -> Self::Service {
        self.assemble(Arc::new(ServiceTransport::new(inner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PropertiesRetryFactory, RetryProperties};
    use crate::selector::RoundRobinSelector;
    use crate::ServiceEndpoint;

    fn selector() -> RoundRobinSelector {
        RoundRobinSelector::new()
            .with_service("orders", vec![ServiceEndpoint::new("orders", "10.0.0.1", 80)])
    }

    #[test]
    fn build_requires_selector_and_transport() {
        let err = LoadBalancerClient::builder().build().unwrap_err();
        assert_eq!(err, BuildError::MissingTransport);
        let err = LoadBalancerClient::builder().into_layer().unwrap_err();
        assert_eq!(err, BuildError::MissingSelector);
    }

    #[test]
    fn retry_path_requires_enabled_factory() {
        let layer = LoadBalancerClient::builder().selector(selector()).into_layer().unwrap();
        assert!(layer.retry.is_none());

        let factory = PropertiesRetryFactory::new(&RetryProperties::default()).unwrap();
        let layer = LoadBalancerClient::builder()
            .selector(selector())
            .retry_factory(factory)
            .into_layer()
            .unwrap();
        assert!(layer.retry.is_some());

        let factory = PropertiesRetryFactory::new(&RetryProperties::default()).unwrap();
        let layer = LoadBalancerClient::builder()
            .selector(selector())
            .retry_factory(factory)
            .retry_enabled(false)
            .into_layer()
            .unwrap();
        assert!(layer.retry.is_none());

        let disabled = RetryProperties { enabled: false, ..Default::default() };
        let layer = LoadBalancerClient::builder()
            .selector(selector())
            .retry_factory(PropertiesRetryFactory::new(&disabled).unwrap())
            .into_layer()
            .unwrap();
        assert!(layer.retry.is_none());
    }
}

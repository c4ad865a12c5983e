//! Request pipeline: bind a request to an endpoint, run it through the registered
//! transformers, and hand it to the selector for execution.
//!
//! Transformers run in registration order on the bound copy; the caller's
//! [`OutboundRequest`] is never touched, so every retry starts from the same original.

use crate::endpoint::ServiceEndpoint;
use crate::error::TransportError;
use crate::request::{BoundRequest, OutboundRequest, Response};
use crate::selector::InstanceSelector;
use crate::transport::Transport;
use http::{HeaderName, HeaderValue};
use std::fmt;
use std::sync::Arc;

/// Rewrites a bound request before it is executed.
///
/// Any `Fn(BoundRequest, &ServiceEndpoint) -> BoundRequest` closure is a transformer.
pub trait RequestTransformer: Send + Sync {
    fn transform(&self, request: BoundRequest, endpoint: &ServiceEndpoint) -> BoundRequest;
}

impl<F> RequestTransformer for F
where
    F: Fn(BoundRequest, &ServiceEndpoint) -> BoundRequest + Send + Sync,
{
    fn transform(&self, request: BoundRequest, endpoint: &ServiceEndpoint) -> BoundRequest {
        self(request, endpoint)
    }
}

/// Sets a fixed header on every outgoing request.
#[derive(Debug, Clone)]
pub struct HeaderTransformer {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderTransformer {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl RequestTransformer for HeaderTransformer {
    fn transform(&self, mut request: BoundRequest, _endpoint: &ServiceEndpoint) -> BoundRequest {
        request.headers.insert(self.name.clone(), self.value.clone());
        request
    }
}

/// Tags the request with the chosen endpoint's instance id, when it has one.
#[derive(Debug, Clone)]
pub struct InstanceIdHeader {
    name: HeaderName,
}

impl InstanceIdHeader {
    pub const DEFAULT_HEADER: &'static str = "x-instance-id";

    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

impl Default for InstanceIdHeader {
    fn default() -> Self {
        Self::new(HeaderName::from_static(Self::DEFAULT_HEADER))
    }
}

impl RequestTransformer for InstanceIdHeader {
    fn transform(&self, mut request: BoundRequest, endpoint: &ServiceEndpoint) -> BoundRequest {
        if let Some(value) = endpoint.instance_id().and_then(|id| HeaderValue::from_str(id).ok()) {
            request.headers.insert(self.name.clone(), value);
        }
        request
    }
}

/// Binds requests to endpoints and executes them over a [`Transport`].
#[derive(Clone)]
pub struct RequestPipeline {
    transformers: Vec<Arc<dyn RequestTransformer>>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("transformers", &self.transformers.len())
            .field("transport", &self.transport)
            .finish()
    }
}

impl RequestPipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transformers: Vec::new(), transport }
    }

    pub(crate) fn from_parts(
        transport: Arc<dyn Transport>,
        transformers: Vec<Arc<dyn RequestTransformer>>,
    ) -> Self {
        Self { transformers, transport }
    }

    /// Append a transformer; it runs after every transformer registered before it.
    pub fn with_transformer<T>(mut self, transformer: T) -> Self
    where
        T: RequestTransformer + 'static,
    {
        self.transformers.push(Arc::new(transformer));
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Bind `request` to `endpoint` and apply every transformer in order.
    pub fn prepare(
        &self,
        request: &OutboundRequest,
        service_name: &str,
        endpoint: Arc<ServiceEndpoint>,
    ) -> Result<BoundRequest, TransportError> {
        let bound = BoundRequest::bind(request, service_name, endpoint.clone())?;
        Ok(self
            .transformers
            .iter()
            .fold(bound, |req, transformer| transformer.transform(req, &endpoint)))
    }

    /// Prepare and execute through `selector`; transport failures pass through unchanged.
    pub async fn execute(
        &self,
        selector: &dyn InstanceSelector,
        request: &OutboundRequest,
        service_name: &str,
        endpoint: Arc<ServiceEndpoint>,
    ) -> Result<Response, TransportError> {
        let bound = self.prepare(request, service_name, endpoint.clone())?;
        selector.execute_on(&endpoint, bound, self.transport.as_ref()).await
    }
}

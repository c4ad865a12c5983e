//! Request and response values that flow through the load-balanced client.
//!
//! The request body is captured once as [`Bytes`] so every attempt replays the same buffer;
//! cloning a request never copies the payload.

use crate::endpoint::{ServiceEndpoint, SCHEME_METADATA_KEY};
use crate::error::{LoadBalancerError, TransportError, TransportErrorKind};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use http::{HeaderMap, Method, StatusCode, Uri};
use std::fmt;
use std::sync::Arc;

/// Streaming response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Request addressed to a logical service (`http://orders/api/items`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl OutboundRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self { method, uri, headers: HeaderMap::new(), body: Bytes::new() }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: Uri, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, uri).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Logical service name taken from the URI host.
    pub fn service_name(&self) -> Result<&str, LoadBalancerError> {
        match self.uri.host() {
            Some(host) if !host.is_empty() => Ok(host),
            _ => Err(LoadBalancerError::InvalidRequest { uri: self.uri.to_string() }),
        }
    }
}

/// Copy of an [`OutboundRequest`] whose target points at a concrete endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub service_name: String,
    pub endpoint: Arc<ServiceEndpoint>,
}

impl BoundRequest {
    /// Rewrite the request authority and scheme to the endpoint, keeping path and query.
    pub fn bind(
        request: &OutboundRequest,
        service_name: &str,
        endpoint: Arc<ServiceEndpoint>,
    ) -> Result<Self, TransportError> {
        let uri = reconstruct_uri(&endpoint, request.uri())?;
        Ok(Self {
            method: request.method().clone(),
            uri,
            headers: request.headers().clone(),
            body: request.body().clone(),
            service_name: service_name.to_string(),
            endpoint,
        })
    }
}

fn resolve_scheme<'a>(endpoint: &'a ServiceEndpoint, original: Option<&'a str>) -> &'a str {
    if let Some(scheme) = endpoint.metadata().get(SCHEME_METADATA_KEY) {
        if !scheme.is_empty() {
            return scheme;
        }
    }
    let original = original.unwrap_or("http");
    if !endpoint.is_secure() {
        return original;
    }
    match original {
        "http" => "https",
        "ws" => "wss",
        other => other,
    }
}

fn reconstruct_uri(endpoint: &ServiceEndpoint, original: &Uri) -> Result<Uri, TransportError> {
    let scheme = resolve_scheme(endpoint, original.scheme_str());
    let path_and_query = original.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Uri::builder()
        .scheme(scheme)
        .authority(endpoint.authority().as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("cannot address endpoint {endpoint}: {e}"),
            )
            .with_source(e)
        })
}

/// Response returned by a [`Transport`](crate::Transport).
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: BodyStream,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self { status, headers, body }
    }

    /// Response with a body that is already in memory.
    pub fn from_bytes(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self::new(status, HeaderMap::new(), stream::once(async move { Ok(body) }).boxed())
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), stream::empty().boxed())
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_body(self) -> BodyStream {
        self.body
    }

    /// Drain the body completely and release the stream.
    pub async fn buffer(self) -> Result<BufferedResponse, TransportError> {
        let Response { status, headers, mut body } = self;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        drop(body);
        Ok(BufferedResponse { status, headers, body: buf.freeze() })
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"<stream>")
            .finish()
    }
}

/// Response whose body has been read into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl From<BufferedResponse> for Response {
    fn from(buffered: BufferedResponse) -> Self {
        Response::from_bytes(buffered.status, buffered.body).with_headers(buffered.headers)
    }
}

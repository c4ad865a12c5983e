//! Transport boundary: the component that actually puts a bound request on the wire.

use crate::error::TransportError;
use crate::request::{BoundRequest, Response};
use async_trait::async_trait;
use tower::ServiceExt;
use tower_service::Service;

/// Sends a bound request and yields the raw response.
///
/// Timeouts are the transport's responsibility; the retry loop waits for as long as `send` does.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: BoundRequest) -> Result<Response, TransportError>;
}

/// Adapts a cloneable tower service into a [`Transport`].
#[derive(Clone, Debug)]
pub struct ServiceTransport<S> {
    inner: S,
}

impl<S> ServiceTransport<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S> Transport for ServiceTransport<S>
where
    S: Service<BoundRequest, Response = Response, Error = TransportError>
        + Clone
        + Send
        + Sync
        + std::fmt::Debug
        + 'static,
    S::Future: Send,
{
    async fn send(&self, request: BoundRequest) -> Result<Response, TransportError> {
        self.inner.clone().oneshot(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ServiceEndpoint;
    use crate::request::OutboundRequest;
    use futures::future::{ready, Ready};
    use http::{StatusCode, Uri};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    #[derive(Clone, Debug)]
    struct Echo;

    impl Service<BoundRequest> for Echo {
        type Response = Response;
        type Error = TransportError;
        type Future = Ready<Result<Response, TransportError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: BoundRequest) -> Self::Future {
            ready(Ok(Response::from_bytes(StatusCode::OK, req.uri.to_string())))
        }
    }

    #[tokio::test]
    async fn service_transport_forwards_to_tower_service() {
        let transport = ServiceTransport::new(Echo);
        let req = OutboundRequest::get(Uri::from_static("http://orders/ping"));
        let ep = Arc::new(ServiceEndpoint::new("orders", "127.0.0.1", 9000));
        let bound = BoundRequest::bind(&req, "orders", ep).unwrap();
        let resp = transport.send(bound).await.unwrap();
        let body = resp.buffer().await.unwrap().body;
        assert_eq!(body, bytes::Bytes::from("http://127.0.0.1:9000/ping"));
    }
}

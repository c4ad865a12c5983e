//! Instance selection boundary and an in-memory round-robin selector.

use crate::endpoint::ServiceEndpoint;
use crate::error::TransportError;
use crate::request::{BoundRequest, Response};
use crate::retry_context::DynEq;
use crate::transport::Transport;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Picks a concrete endpoint for a logical service and runs prepared requests against it.
///
/// Shared by every in-flight call, so implementations must tolerate concurrent `choose`
/// calls. Implementations must also be `PartialEq` (through [`DynEq`]) so retry contexts built
/// around them compare by value.
#[async_trait]
pub trait InstanceSelector: DynEq + Send + Sync + std::fmt::Debug {
    /// Choose an endpoint for `service_name`, or `None` when nothing is available.
    async fn choose(&self, service_name: &str) -> Option<Arc<ServiceEndpoint>>;

    /// Execute a request already bound to `endpoint`.
    ///
    /// The default forwards straight to the transport; selectors that track per-endpoint
    /// statistics override this to observe the call.
    async fn execute_on(
        &self,
        _endpoint: &ServiceEndpoint,
        request: BoundRequest,
        transport: &dyn Transport,
    ) -> Result<Response, TransportError> {
        transport.send(request).await
    }
}

#[derive(Debug)]
struct ServicePool {
    endpoints: ArcSwap<Vec<Arc<ServiceEndpoint>>>,
    cursor: AtomicUsize,
}

impl ServicePool {
    fn new(endpoints: Vec<Arc<ServiceEndpoint>>) -> Self {
        Self { endpoints: ArcSwap::from_pointee(endpoints), cursor: AtomicUsize::new(0) }
    }
}

/// Round-robin selector over a static, swappable endpoint list per service.
///
/// Lookups are lock-free: the service map and each endpoint list live behind `ArcSwap`, and
/// the rotation cursor is a per-service atomic.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    pools: ArcSwap<HashMap<String, Arc<ServicePool>>>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of a service's endpoints.
    pub fn with_service<I>(self, service: impl Into<String>, endpoints: I) -> Self
    where
        I: IntoIterator<Item = ServiceEndpoint>,
    {
        self.set_endpoints(service, endpoints);
        self
    }

    /// Replace the endpoints of `service`. In-flight calls keep the endpoint they already hold.
    pub fn set_endpoints<I>(&self, service: impl Into<String>, endpoints: I)
    where
        I: IntoIterator<Item = ServiceEndpoint>,
    {
        let service = service.into();
        let endpoints: Vec<Arc<ServiceEndpoint>> = endpoints.into_iter().map(Arc::new).collect();
        if let Some(pool) = self.pools.load().get(&service) {
            pool.endpoints.store(Arc::new(endpoints));
            return;
        }
        let pool = Arc::new(ServicePool::new(endpoints));
        self.pools.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(service.clone()).or_insert_with(|| pool.clone());
            next
        });
    }

    /// Snapshot of the endpoints currently registered for `service`.
    pub fn endpoints(&self, service: &str) -> Vec<Arc<ServiceEndpoint>> {
        self.pools
            .load()
            .get(service)
            .map(|pool| Vec::clone(&pool.endpoints.load()))
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Vec<(String, Vec<Arc<ServiceEndpoint>>)> {
        let pools = self.pools.load();
        let mut out: Vec<_> = pools
            .iter()
            .map(|(name, pool)| (name.clone(), Vec::clone(&pool.endpoints.load())))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl PartialEq for RoundRobinSelector {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

#[async_trait]
impl InstanceSelector for RoundRobinSelector {
    async fn choose(&self, service_name: &str) -> Option<Arc<ServiceEndpoint>> {
        let pools = self.pools.load();
        let pool = pools.get(service_name)?;
        let endpoints = pool.endpoints.load();
        if endpoints.is_empty() {
            return None;
        }
        let idx = pool.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Some(endpoints[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(host: &str) -> ServiceEndpoint {
        ServiceEndpoint::new("orders", host, 8080)
    }

    #[tokio::test]
    async fn rotates_through_endpoints() {
        let selector = RoundRobinSelector::new().with_service("orders", vec![ep("a"), ep("b")]);
        let first = selector.choose("orders").await.unwrap();
        let second = selector.choose("orders").await.unwrap();
        let third = selector.choose("orders").await.unwrap();
        assert_eq!(first.host(), "a");
        assert_eq!(second.host(), "b");
        assert_eq!(third.host(), "a");
    }

    #[tokio::test]
    async fn unknown_or_empty_service_yields_none() {
        let selector = RoundRobinSelector::new().with_service("empty", Vec::new());
        assert!(selector.choose("missing").await.is_none());
        assert!(selector.choose("empty").await.is_none());
    }

    #[tokio::test]
    async fn set_endpoints_replaces_list() {
        let selector = RoundRobinSelector::new().with_service("orders", vec![ep("a")]);
        selector.set_endpoints("orders", vec![ep("z")]);
        assert_eq!(selector.choose("orders").await.unwrap().host(), "z");
        assert_eq!(selector.endpoints("orders").len(), 1);
    }

    #[test]
    fn equality_compares_registered_endpoints() {
        let a = RoundRobinSelector::new().with_service("orders", vec![ep("a")]);
        let b = RoundRobinSelector::new().with_service("orders", vec![ep("a")]);
        let c = RoundRobinSelector::new().with_service("orders", vec![ep("c")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn concurrent_choose_is_safe() {
        let selector = Arc::new(
            RoundRobinSelector::new().with_service("orders", vec![ep("a"), ep("b"), ep("c")]),
        );
        let mut handles = Vec::new();
        for _ in 0..8 {
            let selector = selector.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    assert!(selector.choose("orders").await.is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}

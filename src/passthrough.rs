//! Single-attempt execution used when retries are disabled.

use crate::error::LoadBalancerError;
use crate::pipeline::RequestPipeline;
use crate::request::{OutboundRequest, Response};
use crate::selector::InstanceSelector;
use std::sync::Arc;

/// Selects one endpoint and executes once. Every status is returned as a response;
/// transport failures are returned unchanged.
#[derive(Debug, Clone)]
pub struct PassthroughExecutor {
    selector: Arc<dyn InstanceSelector>,
    pipeline: RequestPipeline,
}

impl PassthroughExecutor {
    pub fn new(selector: Arc<dyn InstanceSelector>, pipeline: RequestPipeline) -> Self {
        Self { selector, pipeline }
    }

    pub async fn execute(&self, request: OutboundRequest) -> Result<Response, LoadBalancerError> {
        let service = request.service_name()?;
        let endpoint = self
            .selector
            .choose(service)
            .await
            .ok_or_else(|| LoadBalancerError::NoInstanceAvailable { service: service.to_string() })?;
        tracing::debug!(
            target: "reroute::passthrough",
            service,
            endpoint = %endpoint,
            "executing without retry"
        );
        self.pipeline
            .execute(self.selector.as_ref(), &request, service, endpoint)
            .await
            .map_err(LoadBalancerError::Transport)
    }
}

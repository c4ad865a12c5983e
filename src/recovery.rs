//! What to hand the caller once retries are exhausted.
//!
//! Without a recovery the last recorded failure is returned as an error. A [`Recovery`] gets
//! that failure instead and may turn it into a best-effort response.

use crate::error::{AttemptFailure, LoadBalancerError};
use crate::request::{BufferedResponse, Response};

pub trait Recovery: Send + Sync + std::fmt::Debug {
    fn recover(&self, failure: AttemptFailure) -> Result<Response, LoadBalancerError>;
}

/// Returns the buffered response of an exhausted retryable-status failure as if it were a
/// normal response. Transport failures are still returned as errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReturnLastResponse;

impl Recovery for ReturnLastResponse {
    fn recover(&self, failure: AttemptFailure) -> Result<Response, LoadBalancerError> {
        match failure {
            AttemptFailure::RetryableStatus(f) => Ok(Response::from(BufferedResponse {
                status: f.status,
                headers: f.headers,
                body: f.body,
            })),
            AttemptFailure::Transport(e) => Err(LoadBalancerError::Transport(e)),
        }
    }
}

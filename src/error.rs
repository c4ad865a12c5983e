//! Error types for load-balanced execution.
//!
//! Two layers:
//! - [`AttemptFailure`] is what a single attempt can produce and what the retry loop records.
//!   Both variants are eligible for retry.
//! - [`LoadBalancerError`] is what crosses back to the caller. `InvalidRequest` and
//!   `NoInstanceAvailable` never enter the retry loop; the other two variants are the last
//!   recorded [`AttemptFailure`], returned verbatim once retries are exhausted.
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::sync::Arc;

/// Coarse classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The connection could not be established (refused, unreachable, DNS).
    Connect,
    /// The transport gave up waiting.
    Timeout,
    /// The connection broke while reading or writing.
    Io,
    /// Anything the transport could not classify.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Io => "io",
            TransportErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Network-level failure reported by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} transport failure: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    /// Shorthand for a refused or unreachable connection.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Io, message)
    }

    /// Attach the underlying error that caused this failure.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl PartialEq for TransportError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            _ => TransportErrorKind::Io,
        };
        TransportError::new(kind, err.to_string()).with_source(err)
    }
}

/// A received response whose status the retry policy classified as a failure.
///
/// The body has already been drained from the transport, so the original response resource is
/// released by the time this value exists.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryableStatusFailure {
    pub service: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl fmt::Display for RetryableStatusFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service '{}' responded with retryable status {}", self.service, self.status)
    }
}

impl std::error::Error for RetryableStatusFailure {}

/// Failure produced by one attempt; routed through the retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttemptFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    RetryableStatus(RetryableStatusFailure),
}

impl AttemptFailure {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_retryable_status(&self) -> bool {
        matches!(self, Self::RetryableStatus(_))
    }

    /// Status code carried by a retryable-status failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::RetryableStatus(f) => Some(f.status),
            Self::Transport(_) => None,
        }
    }
}

/// Error returned to callers of the load-balanced client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadBalancerError {
    /// The request target does not name a service. Never retried.
    #[error("request URI does not contain a valid service name: {uri}")]
    InvalidRequest { uri: String },
    /// The selector had no endpoint for the service. Never retried.
    #[error("no instance available for service '{service}'")]
    NoInstanceAvailable { service: String },
    /// Last transport failure after the retry policy declined further attempts.
    #[error(transparent)]
    Transport(TransportError),
    /// Last retryable-status failure after the retry policy declined further attempts.
    #[error(transparent)]
    RetryableStatus(RetryableStatusFailure),
}

impl LoadBalancerError {
    /// Errors that are surfaced before any endpoint is executed against.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. } | Self::NoInstanceAvailable { .. })
    }

    pub fn is_no_instance(&self) -> bool {
        matches!(self, Self::NoInstanceAvailable { .. })
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. })
    }

    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_retryable_status(&self) -> Option<&RetryableStatusFailure> {
        match self {
            Self::RetryableStatus(f) => Some(f),
            _ => None,
        }
    }
}

impl From<AttemptFailure> for LoadBalancerError {
    fn from(failure: AttemptFailure) -> Self {
        match failure {
            AttemptFailure::Transport(e) => LoadBalancerError::Transport(e),
            AttemptFailure::RetryableStatus(f) => LoadBalancerError::RetryableStatus(f),
        }
    }
}

impl From<TransportError> for LoadBalancerError {
    fn from(err: TransportError) -> Self {
        LoadBalancerError::Transport(err)
    }
}

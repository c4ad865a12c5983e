//! Resolved network endpoints for logical services.

use std::collections::BTreeMap;
use std::fmt;

/// Metadata key that overrides the scheme derived from the secure flag.
pub const SCHEME_METADATA_KEY: &str = "scheme";

/// One concrete instance of a logical service.
///
/// Produced by an [`InstanceSelector`](crate::InstanceSelector) and shared as
/// `Arc<ServiceEndpoint>`; never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceEndpoint {
    service_id: String,
    instance_id: Option<String>,
    host: String,
    port: u16,
    secure: bool,
    metadata: BTreeMap<String, String>,
}

impl ServiceEndpoint {
    pub fn new(service_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_id: service_id.into(),
            instance_id: None,
            host: host.into(),
            port,
            secure: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Scheme used to reach this endpoint: the `scheme` metadata entry if present, otherwise
    /// `https` for secure endpoints and `http` for the rest.
    pub fn scheme(&self) -> &str {
        match self.metadata.get(SCHEME_METADATA_KEY) {
            Some(s) if !s.is_empty() => s.as_str(),
            _ if self.secure => "https",
            _ => "http",
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Base URI of the endpoint (`scheme://host:port`).
    pub fn uri(&self) -> Result<http::Uri, http::Error> {
        let uri = http::Uri::builder()
            .scheme(self.scheme())
            .authority(self.authority().as_str())
            .path_and_query("/")
            .build()?;
        Ok(uri)
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance_id {
            Some(id) => write!(f, "{}[{}]@{}", self.service_id, id, self.authority()),
            None => write!(f, "{}@{}", self.service_id, self.authority()),
        }
    }
}

//! Retry configuration and the per-service factory that turns it into policies.

use crate::backoff::{Backoff, BackoffStrategy};
use crate::observer::RetryObserver;
use crate::policy::{BudgetRetryPolicy, PolicyBuildError, RetryDecisionPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Supplies retry collaborators for a service name.
///
/// Called once per invocation, so `policy_for` should return a fresh instance whenever the
/// policy keeps per-call counters.
pub trait RetryFactory: Send + Sync + std::fmt::Debug {
    /// `None` disables retries for `service` (the call still runs once).
    fn policy_for(&self, service: &str) -> Option<Arc<dyn RetryDecisionPolicy>>;

    fn backoff_for(&self, _service: &str) -> Arc<dyn BackoffStrategy> {
        Arc::new(Backoff::none())
    }

    fn observers_for(&self, _service: &str) -> Vec<Arc<dyn RetryObserver>> {
        Vec::new()
    }

    /// Global switch; when false the client takes the single-attempt path.
    fn retry_enabled(&self) -> bool {
        true
    }
}

/// Backoff settings between retries. Disabled by default.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BackoffProperties {
    pub enabled: bool,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BackoffProperties {
    fn default() -> Self {
        Self { enabled: false, min_backoff_ms: 5, max_backoff_ms: 1_000 }
    }
}

impl BackoffProperties {
    /// Exponential from `min_backoff_ms`, capped at `max_backoff_ms`.
    pub fn to_backoff(&self) -> Backoff {
        if !self.enabled {
            return Backoff::none();
        }
        let min = Duration::from_millis(self.min_backoff_ms);
        let max = Duration::from_millis(self.max_backoff_ms);
        Backoff::exponential(min).with_max(max).unwrap_or_else(|_| Backoff::fixed(min))
    }
}

/// Retry settings for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServiceRetryProperties {
    pub max_retries_on_same_endpoint: usize,
    pub max_retries_on_next_endpoint: usize,
    pub retry_on_all_methods: bool,
    pub retryable_status_codes: Vec<u16>,
    pub backoff: BackoffProperties,
}

impl Default for ServiceRetryProperties {
    fn default() -> Self {
        Self {
            max_retries_on_same_endpoint: 0,
            max_retries_on_next_endpoint: 1,
            retry_on_all_methods: false,
            retryable_status_codes: Vec::new(),
            backoff: BackoffProperties::default(),
        }
    }
}

impl ServiceRetryProperties {
    fn to_policy(&self) -> Result<BudgetRetryPolicy, PolicyBuildError> {
        BudgetRetryPolicy::builder()
            .max_same_endpoint(self.max_retries_on_same_endpoint)
            .max_next_endpoint(self.max_retries_on_next_endpoint)
            .retry_on_all_methods(self.retry_on_all_methods)
            .retryable_statuses(self.retryable_status_codes.iter().copied())
            .build()
    }
}

/// Top-level retry configuration.
///
/// `services` entries replace `defaults` wholesale for the named service; fields are not
/// merged.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryProperties {
    pub enabled: bool,
    pub defaults: ServiceRetryProperties,
    pub services: BTreeMap<String, ServiceRetryProperties>,
}

impl Default for RetryProperties {
    fn default() -> Self {
        Self {
            enabled: true,
            defaults: ServiceRetryProperties::default(),
            services: BTreeMap::new(),
        }
    }
}

impl RetryProperties {
    pub fn for_service(&self, service: &str) -> &ServiceRetryProperties {
        self.services.get(service).unwrap_or(&self.defaults)
    }
}

#[derive(Debug)]
struct ServiceTemplate {
    policy: BudgetRetryPolicy,
    backoff: Backoff,
}

/// [`RetryFactory`] backed by [`RetryProperties`].
///
/// Every status code is validated up front; each call gets a fresh [`BudgetRetryPolicy`].
#[derive(Debug)]
pub struct PropertiesRetryFactory {
    enabled: bool,
    defaults: ServiceTemplate,
    services: BTreeMap<String, ServiceTemplate>,
    observers: Vec<Arc<dyn RetryObserver>>,
}

impl PropertiesRetryFactory {
    pub fn new(properties: &RetryProperties) -> Result<Self, PolicyBuildError> {
        let template = |p: &ServiceRetryProperties| -> Result<ServiceTemplate, PolicyBuildError> {
            Ok(ServiceTemplate { policy: p.to_policy()?, backoff: p.backoff.to_backoff() })
        };
        let services = properties
            .services
            .iter()
            .map(|(name, p)| Ok((name.clone(), template(p)?)))
            .collect::<Result<BTreeMap<_, _>, PolicyBuildError>>()?;
        Ok(Self {
            enabled: properties.enabled,
            defaults: template(&properties.defaults)?,
            services,
            observers: Vec::new(),
        })
    }

    /// Observer attached to every retry sequence this factory configures.
    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: RetryObserver + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    fn template(&self, service: &str) -> &ServiceTemplate {
        self.services.get(service).unwrap_or(&self.defaults)
    }
}

impl RetryFactory for PropertiesRetryFactory {
    fn policy_for(&self, service: &str) -> Option<Arc<dyn RetryDecisionPolicy>> {
        if !self.enabled {
            return None;
        }
        Some(Arc::new(self.template(service).policy.fresh()))
    }

    fn backoff_for(&self, service: &str) -> Arc<dyn BackoffStrategy> {
        Arc::new(self.template(service).backoff)
    }

    fn observers_for(&self, _service: &str) -> Vec<Arc<dyn RetryObserver>> {
        self.observers.clone()
    }

    fn retry_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn defaults_match_single_switch_budget() {
        let props = RetryProperties::default();
        assert!(props.enabled);
        let svc = props.for_service("orders");
        assert_eq!(svc.max_retries_on_same_endpoint, 0);
        assert_eq!(svc.max_retries_on_next_endpoint, 1);
        assert!(svc.backoff.to_backoff().is_none());
    }

    #[test]
    fn service_override_replaces_defaults() {
        let mut props = RetryProperties::default();
        props.services.insert(
            "billing".into(),
            ServiceRetryProperties {
                max_retries_on_same_endpoint: 2,
                retryable_status_codes: vec![503],
                ..Default::default()
            },
        );
        let factory = PropertiesRetryFactory::new(&props).unwrap();
        let billing = factory.policy_for("billing").unwrap();
        assert!(billing.is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        let orders = factory.policy_for("orders").unwrap();
        assert!(!orders.is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn disabled_properties_yield_no_policy() {
        let props = RetryProperties { enabled: false, ..Default::default() };
        let factory = PropertiesRetryFactory::new(&props).unwrap();
        assert!(!factory.retry_enabled());
        assert!(factory.policy_for("orders").is_none());
    }

    #[test]
    fn invalid_status_code_fails_construction() {
        let mut props = RetryProperties::default();
        props.defaults.retryable_status_codes = vec![1000];
        assert_eq!(
            PropertiesRetryFactory::new(&props).unwrap_err(),
            PolicyBuildError::InvalidStatusCode(1000)
        );
    }

    #[test]
    fn enabled_backoff_is_capped_exponential() {
        let backoff =
            BackoffProperties { enabled: true, min_backoff_ms: 10, max_backoff_ms: 25 }.to_backoff();
        assert_eq!(backoff.delay_for(1), Duration::from_millis(10));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(20));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(25));
    }

    #[test]
    fn max_below_min_falls_back_to_fixed() {
        let backoff =
            BackoffProperties { enabled: true, min_backoff_ms: 50, max_backoff_ms: 10 }.to_backoff();
        assert_eq!(backoff.delay_for(4), Duration::from_millis(50));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn properties_deserialize_with_defaults() {
        let props: RetryProperties = serde_json::from_str(
            r#"{"services":{"orders":{"retryable_status_codes":[502,503]}}}"#,
        )
        .unwrap();
        assert!(props.enabled);
        let orders = props.for_service("orders");
        assert_eq!(orders.retryable_status_codes, vec![502, 503]);
        assert_eq!(orders.max_retries_on_next_endpoint, 1);
    }
}

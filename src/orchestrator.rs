//! The retry loop.
//!
//! Each call runs through select, execute and classify. After a failure the policy decides
//! between retrying the bound endpoint, selecting the next one, or giving up:
//!
//! ```text
//! INIT -> SELECT -> EXECUTE -> CLASSIFY -+-> success ------------------> DONE
//!           ^         ^                  +-> failure -> same endpoint --+
//!           |         +---------------------------------------------------+
//!           +------------------------ next endpoint (binding cleared) <--+
//!                                      exhausted ----------------------> DONE
//! ```
//!
//! Nothing is spawned: every attempt and every backoff sleep is awaited inside the caller's
//! future, so dropping that future cancels the whole sequence.

use crate::config::RetryFactory;
use crate::error::{AttemptFailure, LoadBalancerError, RetryableStatusFailure};
use crate::jitter::Jitter;
use crate::observer::{notify_all, CloseReason, RetryObserver};
use crate::pipeline::RequestPipeline;
use crate::policy::{NeverRetryPolicy, RetryDecisionPolicy};
use crate::recovery::Recovery;
use crate::request::{OutboundRequest, Response};
use crate::retry_context::RetryContextAdapter;
use crate::selector::InstanceSelector;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::state::{Outcome, RetryState};
use std::fmt;
use std::sync::Arc;

/// What happens after a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    SameEndpoint,
    NextEndpoint,
    Exhausted,
}

/// Retry collaborators that are not tied to a particular endpoint set.
#[derive(Clone)]
pub(crate) struct RetrySettings {
    pub(crate) factory: Arc<dyn RetryFactory>,
    pub(crate) jitter: Jitter,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) recovery: Option<Arc<dyn Recovery>>,
}

impl RetrySettings {
    pub(crate) fn new(factory: Arc<dyn RetryFactory>) -> Self {
        Self { factory, jitter: Jitter::None, sleeper: Arc::new(TokioSleeper), recovery: None }
    }
}

/// Executes requests against load-balanced endpoints, retrying per the service's policy.
#[derive(Clone)]
pub struct RetryOrchestrator {
    selector: Arc<dyn InstanceSelector>,
    pipeline: RequestPipeline,
    settings: RetrySettings,
}

impl fmt::Debug for RetryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOrchestrator")
            .field("selector", &self.selector)
            .field("pipeline", &self.pipeline)
            .field("factory", &self.settings.factory)
            .field("jitter", &self.settings.jitter)
            .field("sleeper", &"<sleeper>")
            .field("recovery", &self.settings.recovery)
            .finish()
    }
}

impl RetryOrchestrator {
    /// Create a builder with no collaborators set.
    pub fn builder() -> RetryOrchestratorBuilder {
        RetryOrchestratorBuilder::new()
    }

    pub(crate) fn from_parts(
        selector: Arc<dyn InstanceSelector>,
        pipeline: RequestPipeline,
        settings: RetrySettings,
    ) -> Self {
        Self { selector, pipeline, settings }
    }

    /// Run `request` to completion.
    ///
    /// Returns the first response whose status the policy does not classify as retryable.
    /// When the policy declines further attempts, the last failure is returned (or handed to
    /// the configured [`Recovery`]). A missing host or an empty endpoint set is returned
    /// immediately and never retried.
    pub async fn execute(&self, request: OutboundRequest) -> Result<Response, LoadBalancerError> {
        let service = request.service_name()?.to_string();
        let request = Arc::new(request);
        let factory = &self.settings.factory;
        let policy: Arc<dyn RetryDecisionPolicy> =
            factory.policy_for(&service).unwrap_or_else(|| Arc::new(NeverRetryPolicy));
        let backoff = factory.backoff_for(&service);
        let observers = factory.observers_for(&service);

        let ctx = RetryContextAdapter::new(
            request.clone(),
            policy,
            self.selector.clone(),
            service.clone(),
        );
        let mut state = ctx.open();

        loop {
            let endpoint = match ctx.bind_endpoint(&mut state).await {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    self.close(&ctx, &state, &observers, CloseReason::Aborted);
                    return Err(err);
                }
            };
            notify_all(&observers, |o| o.on_attempt(&service, &state));

            let failure = match self.attempt(&ctx, &request, endpoint).await {
                Outcome::Success(response) => {
                    self.close(&ctx, &state, &observers, CloseReason::Succeeded);
                    return Ok(response);
                }
                Outcome::Failure(failure) => failure,
            };

            ctx.record_failure(&mut state, failure.clone());
            notify_all(&observers, |o| o.on_failure(&service, &state, &failure));

            match next_step(&ctx, &state) {
                NextStep::SameEndpoint => {
                    tracing::debug!(
                        target: "reroute::retry",
                        service = %service,
                        attempts = state.attempts(),
                        "retrying same endpoint"
                    );
                }
                NextStep::NextEndpoint => {
                    let previous = state.clear_endpoint();
                    tracing::debug!(
                        target: "reroute::retry",
                        service = %service,
                        attempts = state.attempts(),
                        previous = ?previous.as_deref().map(|e| e.authority()),
                        "retrying next endpoint"
                    );
                }
                NextStep::Exhausted => {
                    self.close(&ctx, &state, &observers, CloseReason::Exhausted);
                    return self.exhausted(&service, &state, failure);
                }
            }

            let delay = self.settings.jitter.apply(backoff.delay_for(state.attempts()));
            self.settings.sleeper.sleep(delay).await;
        }
    }

    /// One execute-and-classify step. A retryable status is fully buffered before it is
    /// reported so the connection is released ahead of the next attempt.
    async fn attempt(
        &self,
        ctx: &RetryContextAdapter,
        request: &OutboundRequest,
        endpoint: Arc<crate::endpoint::ServiceEndpoint>,
    ) -> Outcome {
        let service = ctx.service_name();
        let response = match self
            .pipeline
            .execute(self.selector.as_ref(), request, service, endpoint)
            .await
        {
            Ok(response) => response,
            Err(err) => return Outcome::Failure(err.into()),
        };

        let status = response.status();
        if !ctx.policy().is_retryable_status(status) {
            return Outcome::Success(response);
        }
        tracing::debug!(
            target: "reroute::retry",
            service = %service,
            status = status.as_u16(),
            "retrying on status code"
        );
        match response.buffer().await {
            Ok(buffered) => Outcome::Failure(AttemptFailure::RetryableStatus(
                RetryableStatusFailure {
                    service: service.to_string(),
                    status: buffered.status,
                    headers: buffered.headers,
                    body: buffered.body,
                },
            )),
            Err(err) => Outcome::Failure(err.into()),
        }
    }

    fn close(
        &self,
        ctx: &RetryContextAdapter,
        state: &RetryState,
        observers: &[Arc<dyn RetryObserver>],
        reason: CloseReason,
    ) {
        ctx.close(state);
        notify_all(observers, |o| o.on_close(ctx.service_name(), state, reason));
    }

    /// Hand the last failure to the recovery, or return it as the error.
    fn exhausted(
        &self,
        service: &str,
        state: &RetryState,
        failure: AttemptFailure,
    ) -> Result<Response, LoadBalancerError> {
        tracing::warn!(
            target: "reroute::retry",
            service = %service,
            failures = state.attempts(),
            "retries exhausted"
        );
        match &self.settings.recovery {
            Some(recovery) => recovery.recover(failure),
            None => Err(failure.into()),
        }
    }
}

/// `should_attempt` alone decides whether another attempt happens; the same-endpoint answer
/// only picks where it goes.
fn next_step(ctx: &RetryContextAdapter, state: &RetryState) -> NextStep {
    if !ctx.should_attempt(state) {
        NextStep::Exhausted
    } else if ctx.policy().can_retry_same_endpoint(state) {
        NextStep::SameEndpoint
    } else {
        NextStep::NextEndpoint
    }
}

/// Errors produced while building a [`RetryOrchestrator`] or a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    MissingSelector,
    MissingTransport,
    MissingRetryFactory,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::MissingSelector => write!(f, "an instance selector is required"),
            BuildError::MissingTransport => write!(f, "a transport is required"),
            BuildError::MissingRetryFactory => write!(f, "a retry factory is required"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Builder for [`RetryOrchestrator`].
pub struct RetryOrchestratorBuilder {
    selector: Option<Arc<dyn InstanceSelector>>,
    pipeline: Option<RequestPipeline>,
    factory: Option<Arc<dyn RetryFactory>>,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    recovery: Option<Arc<dyn Recovery>>,
}

impl RetryOrchestratorBuilder {
    /// Create a builder with no jitter, the tokio sleeper and no recovery.
    pub fn new() -> Self {
        Self {
            selector: None,
            pipeline: None,
            factory: None,
            jitter: Jitter::None,
            sleeper: Arc::new(TokioSleeper),
            recovery: None,
        }
    }

    /// Set the shared instance selector. Required.
    pub fn selector(mut self, selector: Arc<dyn InstanceSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Set the request pipeline and its transport. Required.
    pub fn pipeline(mut self, pipeline: RequestPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Set the per-service retry factory. Required.
    pub fn retry_factory(mut self, factory: Arc<dyn RetryFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Jitter applied on top of the service's backoff.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
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

    /// Build the orchestrator, checking that every required collaborator is set.
    pub fn build(self) -> Result<RetryOrchestrator, BuildError> {
        let selector = self.selector.ok_or(BuildError::MissingSelector)?;
        let pipeline = self.pipeline.ok_or(BuildError::MissingTransport)?;
        let factory = self.factory.ok_or(BuildError::MissingRetryFactory)?;
        Ok(RetryOrchestrator::from_parts(
            selector,
            pipeline,
            RetrySettings {
                factory,
                jitter: self.jitter,
                sleeper: self.sleeper,
                recovery: self.recovery,
            },
        ))
    }
}

impl Default for RetryOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

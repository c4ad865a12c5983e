#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use http::{HeaderMap, StatusCode};
use reroute::{
    AttemptFailure, BoundRequest, InstanceSelector, Response, RetryDecisionPolicy, RetryState,
    ServiceEndpoint, Transport, TransportError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared ordered log of what the fixtures saw.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub fn endpoint(host: &str) -> ServiceEndpoint {
    ServiceEndpoint::new("orders", host, 80)
}

/// Hands out endpoints in order, cycling, and counts `choose` calls.
#[derive(Debug)]
pub struct ScriptedSelector {
    endpoints: Vec<Arc<ServiceEndpoint>>,
    cursor: AtomicUsize,
    calls: Arc<AtomicUsize>,
    log: EventLog,
}

impl ScriptedSelector {
    pub fn new(endpoints: Vec<ServiceEndpoint>, log: EventLog) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
            calls: Arc::new(AtomicUsize::new(0)),
            log,
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl PartialEq for ScriptedSelector {
    fn eq(&self, other: &Self) -> bool {
        self.endpoints == other.endpoints
    }
}

#[async_trait]
impl InstanceSelector for ScriptedSelector {
    async fn choose(&self, _service_name: &str) -> Option<Arc<ServiceEndpoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.push("choose");
        if self.endpoints.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.endpoints.len();
        Some(self.endpoints[idx].clone())
    }
}

/// One scripted reply from [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub enum Reply {
    Refuse,
    Timeout,
    Status(u16, &'static str),
}

/// Replays per-authority scripts; an authority with no script left answers 200 "ok".
///
/// Response bodies log `drained` once they have been read to the end.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    log: EventLog,
}

impl ScriptedTransport {
    pub fn new(log: EventLog) -> Self {
        Self { script: Arc::default(), log }
    }

    pub fn on(self, authority: &str, replies: Vec<Reply>) -> Self {
        self.script.lock().unwrap().insert(authority.to_string(), replies.into());
        self
    }

    fn next_reply(&self, authority: &str) -> Reply {
        self.script
            .lock()
            .unwrap()
            .get_mut(authority)
            .and_then(|q| q.pop_front())
            .unwrap_or(Reply::Status(200, "ok"))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: BoundRequest) -> Result<Response, TransportError> {
        let authority = request.uri.authority().map(|a| a.to_string()).unwrap_or_default();
        self.log.push(format!("send {authority}"));
        match self.next_reply(&authority) {
            Reply::Refuse => Err(TransportError::connect(format!("{authority} refused"))),
            Reply::Timeout => Err(TransportError::timeout(format!("{authority} timed out"))),
            Reply::Status(code, body) => {
                let status = StatusCode::from_u16(code).unwrap();
                let log = self.log.clone();
                let chunks = vec![Ok(Bytes::from_static(body.as_bytes()))];
                let tail = stream::once(async move { log.push("drained") })
                    .filter_map(|()| futures::future::ready(None::<Result<Bytes, TransportError>>));
                let body = stream::iter(chunks).chain(tail).boxed();
                Ok(Response::new(status, HeaderMap::new(), body))
            }
        }
    }
}

/// Fixed answers for both retry questions; logs every consultation.
#[derive(Debug)]
pub struct FixedAnswerPolicy {
    pub same: bool,
    pub next: bool,
    pub log: EventLog,
}

impl PartialEq for FixedAnswerPolicy {
    fn eq(&self, other: &Self) -> bool {
        self.same == other.same && self.next == other.next
    }
}

impl RetryDecisionPolicy for FixedAnswerPolicy {
    fn can_retry_same_endpoint(&self, _state: &RetryState) -> bool {
        self.log.push("can_retry_same");
        self.same
    }

    fn can_retry_next_endpoint(&self, _state: &RetryState) -> bool {
        self.log.push("can_retry_next");
        self.next
    }

    fn is_retryable_status(&self, _status: StatusCode) -> bool {
        false
    }

    fn on_failure(&self, _state: &RetryState, _failure: &AttemptFailure) {
        self.log.push("policy_failure");
    }

    fn on_close(&self, _state: &RetryState) {
        self.log.push("policy_close");
    }
}

/// Factory returning a fresh [`FixedAnswerPolicy`] per call.
#[derive(Debug)]
pub struct FixedAnswerFactory {
    pub same: bool,
    pub next: bool,
    pub log: EventLog,
}

impl reroute::RetryFactory for FixedAnswerFactory {
    fn policy_for(&self, _service: &str) -> Option<Arc<dyn RetryDecisionPolicy>> {
        Some(Arc::new(FixedAnswerPolicy {
            same: self.same,
            next: self.next,
            log: self.log.clone(),
        }))
    }
}

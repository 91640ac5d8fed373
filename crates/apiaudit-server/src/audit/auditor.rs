//! Audit event construction
//!
//! [`Auditor::log_request`] runs before the handler and builds the event from
//! the resolved request info, the caller identity and, when policy asks for
//! it, the request body. [`Auditor::log_response`] runs once the response has
//! been written and hands the finished event to the delivery queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use apiaudit_common::types::Level;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request},
    http::header,
};
use chrono::Utc;
use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace};

use super::backend::Backend;
use super::capture::{ResponseCapture, ResponseWriter};
use super::event::{Event, ObjectReference, RawObject, ResponseStatus, UserInfo, Verb};
use super::level::{AuditPolicy, WebhookStore};
use super::projects::{ProjectLister, Query};
use super::queue::{DeliveryQueue, QueueConfig};
use super::sink::AuditSink;
use crate::request::{has_query_param, remote_ip, RequestInfo};

const USERS_RESOURCE: &str = "users";
const USER_STATE_ACTIVE: &str = "Active";
const USER_STATE_DISABLED: &str = "Disabled";

/// Outcome of [`Auditor::log_request`]
#[derive(Debug, Clone, PartialEq)]
pub enum AuditDecision {
    Audited(Box<Event>),
    /// The request is excluded; nothing will be delivered for it
    NotAudited,
}

impl AuditDecision {
    pub fn is_audited(&self) -> bool {
        matches!(self, Self::Audited(_))
    }

    pub fn event(&self) -> Option<&Event> {
        match self {
            Self::Audited(event) => Some(event),
            Self::NotAudited => None,
        }
    }

    pub fn into_event(self) -> Option<Event> {
        match self {
            Self::Audited(event) => Some(*event),
            Self::NotAudited => None,
        }
    }
}

/// Builds audit events and hands them to the delivery queue.
///
/// Cheap to clone; every request handler holds its own copy.
#[derive(Clone)]
pub struct Auditor {
    policy: AuditPolicy,
    projects: Arc<dyn ProjectLister>,
    queue: DeliveryQueue,
    finalizers: TaskTracker,
}

impl Auditor {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        projects: Arc<dyn ProjectLister>,
        queue: DeliveryQueue,
    ) -> Self {
        Self {
            policy: AuditPolicy::new(store),
            projects,
            queue,
            finalizers: TaskTracker::new(),
        }
    }

    /// Build the whole pipeline: queue, backend task and auditor.
    ///
    /// The backend drains into `sink` until `shutdown` fires, then keeps
    /// delivering for at most `shutdown_grace`.
    pub fn start(
        store: Arc<dyn WebhookStore>,
        projects: Arc<dyn ProjectLister>,
        sink: Arc<dyn AuditSink>,
        queue_config: QueueConfig,
        shutdown_grace: Duration,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (queue, receiver) = DeliveryQueue::new(queue_config);
        let handle = Backend::new(sink, shutdown_grace).spawn(receiver, shutdown);
        (Self::new(store, projects, queue), handle)
    }

    pub fn enabled(&self) -> bool {
        self.policy.enabled()
    }

    pub fn k8s_auditing_enabled(&self) -> bool {
        self.policy.k8s_auditing_enabled()
    }

    pub fn level(&self) -> Level {
        self.policy.level()
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Tasks finishing events of responses that already ended
    pub(crate) fn finalizers(&self) -> &TaskTracker {
        &self.finalizers
    }

    /// Wait until every finished response has its event queued.
    ///
    /// Call after the server stops accepting requests and before cancelling
    /// the backend, otherwise late events meet a closed queue and are counted
    /// as dropped. Bodies still streaming keep finalizing after this returns.
    pub async fn flush(&self) {
        self.finalizers.close();
        self.finalizers.wait().await;
    }

    /// Build the event for `request` at the level currently configured.
    pub async fn log_request(&self, request: Request, info: &RequestInfo) -> (Request, AuditDecision) {
        self.log_request_at(self.policy.level(), request, info).await
    }

    /// Build the event for `request` at `level`.
    ///
    /// Every decision about the request uses this one level, so a level change
    /// racing with the request cannot split it. Below `Metadata` nothing is
    /// audited. The request is returned with its body intact; if the body had
    /// to be read it is replaced by an in-memory copy.
    pub async fn log_request_at(
        &self,
        level: Level,
        request: Request,
        info: &RequestInfo,
    ) -> (Request, AuditDecision) {
        if !level.greater_or_equal(Level::Metadata) {
            return (request, AuditDecision::NotAudited);
        }
        if info.is_kubernetes_request && has_query_param(request.uri(), "dryRun") {
            trace!(path = %info.path, "ignoring dryRun request");
            return (request, AuditDecision::NotAudited);
        }

        let mut event = Event::new(
            level,
            Verb::from(info.verb.as_str()),
            ObjectReference {
                resource: info.resource.clone(),
                namespace: info.namespace.clone(),
                name: info.name.clone(),
                api_group: info.api_group.clone(),
                api_version: info.api_version.clone(),
                resource_version: info.resource_scope.clone(),
                subresource: info.subresource.clone(),
            },
        );
        event.request_uri = info.path.clone();
        event.workspace = info.workspace.clone();
        event.devops = info.devops.clone();
        event.cluster = info.cluster.clone();
        event.user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        event.source_ips = vec![remote_ip(request.headers(), peer)];

        if let Some(user) = request.extensions().get::<UserInfo>() {
            event.user = user.clone();
        }

        if !event.devops.is_empty() && event.workspace.is_empty() {
            self.attribute_workspace(&mut event).await;
        }

        let request = if needs_request_body(&event, &request) {
            inspect_request_body(request, &mut event).await
        } else {
            request
        };

        (request, AuditDecision::Audited(Box::new(event)))
    }

    /// Finish the event with the captured response and queue it.
    ///
    /// A `NotAudited` decision is a no-op.
    pub async fn log_response<W: ResponseWriter>(
        &self,
        decision: AuditDecision,
        capture: &ResponseCapture<W>,
    ) {
        let Some(mut event) = decision.into_event() else {
            return;
        };

        event.stage_timestamp = Some(Utc::now());
        event.response_status = Some(ResponseStatus {
            code: capture.status_code().as_u16(),
        });
        if event.level.greater_or_equal(Level::RequestResponse) {
            event.response_object = Some(RawObject(capture.to_bytes()));
        }

        self.queue.enqueue(event).await;
    }

    /// Resolve the workspace of the event's devops project.
    ///
    /// Projects may be addressed by name or, for older clients, by their
    /// admin namespace; the latter is rewritten to the project name.
    async fn attribute_workspace(&self, event: &mut Event) {
        let projects = match self.projects.list(&Query::default()).await {
            Ok(projects) => projects,
            Err(e) => {
                error!(devops = %event.devops, error = %e, "Failed to list devops projects");
                return;
            },
        };

        for project in projects {
            let workspace = project.workspace().unwrap_or_default().to_string();
            if project.name == event.devops {
                event.workspace = workspace;
            } else if project.admin_namespace == event.devops {
                event.workspace = workspace;
                event.devops = project.name;
            }
        }
    }
}

fn needs_request_body(event: &Event, request: &Request) -> bool {
    if content_length(request) == 0 {
        return false;
    }

    event.level.greater_or_equal(Level::Request)
        || event.verb == Verb::Create
        || (event.object_ref.resource == USERS_RESOURCE && event.verb == Verb::Update)
}

/// Declared body length, falling back to the body's exact size when known
fn content_length(request: &Request) -> u64 {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| HttpBody::size_hint(request.body()).exact())
        .unwrap_or(0)
}

async fn inspect_request_body(request: Request, event: &mut Event) -> Request {
    let (parts, body) = request.into_parts();

    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(audit_id = %event.audit_id, error = %e, "Failed to read request body");
            return Request::from_parts(parts, Body::empty());
        },
    };

    debug!(audit_id = %event.audit_id, body_size = bytes.len(), "Captured request body");

    if event.level.greater_or_equal(Level::Request) {
        event.request_object = Some(RawObject(bytes.clone()));
    }

    if event.verb == Verb::Create {
        if let Some(name) = object_name(&bytes) {
            event.object_ref.name = name;
        }
    }

    if event.object_ref.resource == USERS_RESOURCE && event.verb == Verb::Update {
        match user_state(&bytes).as_deref() {
            Some(USER_STATE_ACTIVE) => event.verb = Verb::Enable,
            Some(USER_STATE_DISABLED) => event.verb = Verb::Disable,
            _ => {},
        }
    }

    Request::from_parts(parts, Body::from(bytes))
}

#[derive(Deserialize)]
struct NamedObject {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    metadata: Option<ObjectMeta>,
}

#[derive(Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: Option<String>,
}

/// Name carried by a create body, either top-level or under `metadata`
fn object_name(body: &Bytes) -> Option<String> {
    let object: NamedObject = serde_json::from_slice(body).ok()?;
    object.name.or_else(|| object.metadata.and_then(|m| m.name))
}

#[derive(Deserialize)]
struct UserObject {
    #[serde(default)]
    status: UserStatus,
}

#[derive(Deserialize, Default)]
struct UserStatus {
    #[serde(default)]
    state: Option<String>,
}

fn user_state(body: &Bytes) -> Option<String> {
    let user: UserObject = serde_json::from_slice(body).ok()?;
    user.status.state
}

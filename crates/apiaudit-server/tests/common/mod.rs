//! Shared helpers for the apiaudit-server integration tests
//!
//! [`TestApp`] runs the full router and audit pipeline in-process, with
//! events delivered to a [`RecordingSink`] so tests can inspect them.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use apiaudit_common::types::Level;
use apiaudit_server::audit::{
    AuditSink, Auditor, DevOpsProject, Event, InMemoryProjectRegistry, InMemoryWebhookStore,
    QueueConfig, SinkError, Webhook,
};
use apiaudit_server::config::Config;
use apiaudit_server::routes::{self, AppState};
use async_trait::async_trait;
use axum::{body::Body, extract::Request, response::Response, Router};
use http_body_util::BodyExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Bearer token the test router accepts for admin requests
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Sink that keeps every event it receives.
///
/// A gated sink blocks each delivery until [`RecordingSink::open`] is called.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
    gate: Option<Semaphore>,
}

impl RecordingSink {
    pub fn gated() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            gate: Some(Semaphore::new(0)),
        }
    }

    pub fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until at least `count` events arrived
    pub async fn wait_for(&self, count: usize) -> Vec<Event> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let events = self.events();
            if events.len() >= count {
                return events;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} audit events, got {}",
                events.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn submit(&self, event: Event) -> Result<(), SinkError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub auditor: Auditor,
    pub webhooks: Arc<InMemoryWebhookStore>,
    pub sink: Arc<RecordingSink>,
    pub shutdown: CancellationToken,
    pub backend: JoinHandle<()>,
}

pub struct TestAppBuilder {
    level: Level,
    k8s_auditing_enabled: bool,
    queue: QueueConfig,
    sink: RecordingSink,
    projects: Vec<DevOpsProject>,
    admin_token: Option<&'static str>,
}

impl TestAppBuilder {
    pub fn admin_token(mut self, token: Option<&'static str>) -> Self {
        self.admin_token = token;
        self
    }

    pub fn k8s_auditing_enabled(mut self, enabled: bool) -> Self {
        self.k8s_auditing_enabled = enabled;
        self
    }

    pub fn queue(mut self, capacity: usize, timeout: Duration) -> Self {
        self.queue = QueueConfig { capacity, timeout };
        self
    }

    pub fn sink(mut self, sink: RecordingSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn project(mut self, project: DevOpsProject) -> Self {
        self.projects.push(project);
        self
    }

    pub fn start(self) -> TestApp {
        let webhooks = Arc::new(InMemoryWebhookStore::with_default(Webhook {
            audit_level: self.level,
            k8s_auditing_enabled: self.k8s_auditing_enabled,
        }));
        let sink = Arc::new(self.sink);
        let shutdown = CancellationToken::new();

        let (auditor, backend) = Auditor::start(
            webhooks.clone(),
            Arc::new(InMemoryProjectRegistry::new(self.projects)),
            sink.clone(),
            self.queue,
            Duration::from_secs(1),
            shutdown.clone(),
        );

        let state = AppState {
            auditor: auditor.clone(),
            webhooks: webhooks.clone(),
            admin_token: self.admin_token.map(Arc::from),
        };
        let router = routes::create_router(state, &Config::default());

        TestApp {
            router,
            auditor,
            webhooks,
            sink,
            shutdown,
            backend,
        }
    }
}

impl TestApp {
    pub fn builder(level: Level) -> TestAppBuilder {
        TestAppBuilder {
            level,
            k8s_auditing_enabled: false,
            queue: QueueConfig::default(),
            sink: RecordingSink::default(),
            projects: Vec::new(),
            admin_token: Some(ADMIN_TOKEN),
        }
    }

    pub fn start(level: Level) -> Self {
        Self::builder(level).start()
    }

    /// Send `request` and read the whole response body
    pub async fn send(&self, request: Request) -> (Response<()>, bytes::Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        (Response::from_parts(parts, ()), bytes)
    }

    /// Stop the backend and wait for it to flush
    pub async fn shutdown(self) -> Arc<RecordingSink> {
        self.auditor.flush().await;
        self.shutdown.cancel();
        self.backend.await.unwrap();
        self.sink
    }
}

pub fn request(method: &str, uri: &str, body: &'static str) -> Request {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// `request` carrying the admin bearer token
pub fn admin_request(method: &str, uri: &str, body: &'static str) -> Request {
    let mut request = request(method, uri, body);
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {ADMIN_TOKEN}").parse().unwrap(),
    );
    request
}

pub fn json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap()
}

use super::middleware::*;
use super::{
    AuditDecision, Auditor, DeliveryQueue, Event, EventReceiver, InMemoryProjectRegistry,
    InMemoryWebhookStore, QueueConfig, ResponseCapture, ResponseWriter, StoreError, Verb, Webhook,
    WebhookStore,
};
use crate::request::RequestInfo;
use apiaudit_common::types::Level;
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{Method, StatusCode},
    routing::{get, post, put},
    Extension, Json, Router,
};
use http_body_util::BodyExt;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn create_user(body: Bytes) -> (StatusCode, Bytes) {
    (StatusCode::CREATED, body)
}

async fn update_user() -> Json<serde_json::Value> {
    Json(json!({"updated": true}))
}

async fn list_pods() -> Json<serde_json::Value> {
    Json(json!({"kind": "PodList", "items": []}))
}

async fn forbidden() -> StatusCode {
    StatusCode::FORBIDDEN
}

struct Harness {
    store: Arc<InMemoryWebhookStore>,
    auditor: Auditor,
    rx: EventReceiver,
}

fn harness(level: Level, k8s_auditing_enabled: bool) -> Harness {
    let store = Arc::new(InMemoryWebhookStore::with_default(Webhook {
        audit_level: level,
        k8s_auditing_enabled,
    }));
    let (queue, rx) = DeliveryQueue::new(QueueConfig::default());
    let auditor = Auditor::new(
        store.clone(),
        Arc::new(InMemoryProjectRegistry::default()),
        queue,
    );
    Harness { store, auditor, rx }
}

fn router(auditor: Auditor) -> Router {
    Router::new()
        .route("/kapis/iam.kubesphere.io/v1alpha2/users", post(create_user))
        .route("/kapis/iam.kubesphere.io/v1alpha2/users/:name", put(update_user))
        .route("/api/v1/namespaces/:namespace/pods", get(list_pods))
        .route("/kapis/tenant.kubesphere.io/v1alpha2/workspaces", get(forbidden))
        .layer(AuditLayer::new(auditor))
}

fn request(method: Method, uri: &str, body: &'static str) -> Request {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn next_event(rx: &mut EventReceiver) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("audit event was not delivered")
        .expect("audit queue closed")
}

async fn assert_no_event(rx: &mut EventReceiver) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "unexpected audit event");
}

async fn read_body(response: axum::response::Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

#[tokio::test]
async fn test_level_none_passes_through() {
    let mut h = harness(Level::None, false);
    let response = router(h.auditor.clone())
        .oneshot(request(Method::POST, "/kapis/iam.kubesphere.io/v1alpha2/users", r#"{"name":"alice"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(read_body(response).await, r#"{"name":"alice"}"#);
    assert_no_event(&mut h.rx).await;
}

#[tokio::test]
async fn test_create_is_audited_and_body_reaches_handler() {
    let mut h = harness(Level::Metadata, false);
    let response = router(h.auditor.clone())
        .oneshot(request(Method::POST, "/kapis/iam.kubesphere.io/v1alpha2/users", r#"{"name":"alice"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(read_body(response).await, r#"{"name":"alice"}"#);

    let event = next_event(&mut h.rx).await;
    assert_eq!(event.verb, Verb::Create);
    assert_eq!(event.object_ref.resource, "users");
    assert_eq!(event.object_ref.name, "alice");
    assert_eq!(event.response_status.unwrap().code, 201);
    assert!(event.request_object.is_none());
    assert!(event.response_object.is_none());
    assert!(event.stage_timestamp.is_some());
}

#[tokio::test]
async fn test_request_response_level_records_streamed_body() {
    let mut h = harness(Level::RequestResponse, false);
    let response = router(h.auditor.clone())
        .oneshot(request(Method::PUT, "/kapis/iam.kubesphere.io/v1alpha2/users/bob", r#"{"status":{"state":"Disabled"}}"#))
        .await
        .unwrap();
    let body = read_body(response).await;

    let event = next_event(&mut h.rx).await;
    assert_eq!(event.verb, Verb::Disable);
    assert_eq!(event.object_ref.name, "bob");
    assert_eq!(
        event.request_object.unwrap().as_bytes(),
        br#"{"status":{"state":"Disabled"}}"#
    );
    assert_eq!(event.response_object.unwrap().as_bytes(), &body[..]);
}

#[tokio::test]
async fn test_error_status_is_recorded() {
    let mut h = harness(Level::Metadata, false);
    let response = router(h.auditor.clone())
        .oneshot(request(Method::GET, "/kapis/tenant.kubesphere.io/v1alpha2/workspaces", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    read_body(response).await;

    let event = next_event(&mut h.rx).await;
    assert_eq!(event.verb, Verb::List);
    assert_eq!(event.response_status.unwrap().code, 403);
}

#[tokio::test]
async fn test_dry_run_is_not_audited() {
    let mut h = harness(Level::RequestResponse, false);
    let response = router(h.auditor.clone())
        .oneshot(request(Method::GET, "/api/v1/namespaces/dev/pods?dryRun=All", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    read_body(response).await;
    assert_no_event(&mut h.rx).await;
}

#[tokio::test]
async fn test_kubernetes_requests_skipped_when_audited_upstream() {
    let mut h = harness(Level::Metadata, true);
    let app = router(h.auditor.clone());

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/v1/namespaces/dev/pods", ""))
        .await
        .unwrap();
    read_body(response).await;
    assert_no_event(&mut h.rx).await;

    let response = app
        .oneshot(request(Method::GET, "/kapis/tenant.kubesphere.io/v1alpha2/workspaces", ""))
        .await
        .unwrap();
    read_body(response).await;
    assert_eq!(next_event(&mut h.rx).await.object_ref.resource, "workspaces");
}

#[tokio::test]
async fn test_level_change_applies_to_next_request() {
    let mut h = harness(Level::None, false);
    let app = router(h.auditor.clone());

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/v1/namespaces/dev/pods", ""))
        .await
        .unwrap();
    read_body(response).await;
    assert_no_event(&mut h.rx).await;

    h.store.set(
        super::DEFAULT_WEBHOOK,
        Webhook {
            audit_level: Level::Metadata,
            k8s_auditing_enabled: false,
        },
    );

    let response = app
        .oneshot(request(Method::GET, "/api/v1/namespaces/dev/pods", ""))
        .await
        .unwrap();
    read_body(response).await;
    let event = next_event(&mut h.rx).await;
    assert_eq!(event.object_ref.namespace, "dev");
    assert_eq!(event.verb, Verb::List);
}

/// Store whose level drops to `None` after the first lookup.
#[derive(Default)]
struct SwitchedOffStore {
    lookups: AtomicUsize,
}

impl WebhookStore for SwitchedOffStore {
    fn get(&self, _name: &str) -> Result<Webhook, StoreError> {
        let audit_level = match self.lookups.fetch_add(1, Ordering::SeqCst) {
            0 => Level::Metadata,
            _ => Level::None,
        };
        Ok(Webhook {
            audit_level,
            k8s_auditing_enabled: false,
        })
    }
}

#[tokio::test]
async fn test_level_read_once_per_request() {
    let store = Arc::new(SwitchedOffStore::default());
    let (queue, mut rx) = DeliveryQueue::new(QueueConfig::default());
    let auditor = Auditor::new(
        store.clone(),
        Arc::new(InMemoryProjectRegistry::default()),
        queue,
    );

    let response = router(auditor)
        .oneshot(request(Method::GET, "/api/v1/namespaces/dev/pods", ""))
        .await
        .unwrap();
    read_body(response).await;

    let event = next_event(&mut rx).await;
    assert_eq!(event.level, Level::Metadata);
    assert!(store.lookups.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_upstream_request_info_is_used() {
    let mut h = harness(Level::Metadata, false);
    let info = RequestInfo {
        is_resource_request: true,
        path: "/custom".to_string(),
        verb: "get".to_string(),
        resource: "widgets".to_string(),
        name: "w-1".to_string(),
        workspace: "demo".to_string(),
        ..Default::default()
    };
    let app = router(h.auditor.clone()).layer(Extension(info));

    let response = app
        .oneshot(request(Method::GET, "/api/v1/namespaces/dev/pods", ""))
        .await
        .unwrap();
    read_body(response).await;

    let event = next_event(&mut h.rx).await;
    assert_eq!(event.object_ref.resource, "widgets");
    assert_eq!(event.object_ref.name, "w-1");
    assert_eq!(event.workspace, "demo");
    assert_eq!(event.request_uri, "/custom");
}

#[tokio::test]
async fn test_dropped_body_still_delivers_event() {
    let mut h = harness(Level::RequestResponse, false);
    let response = router(h.auditor.clone())
        .oneshot(request(Method::GET, "/api/v1/namespaces/dev/pods", ""))
        .await
        .unwrap();
    drop(response);

    let event = next_event(&mut h.rx).await;
    assert_eq!(event.response_status.unwrap().code, 200);
    assert!(event.response_object.unwrap().as_bytes().is_empty());
}

#[tokio::test]
async fn test_audited_body_finalizes_once() {
    let mut h = harness(Level::Metadata, false);
    let (request, decision) = h
        .auditor
        .log_request(
            request(Method::GET, "/api/v1/namespaces/dev/pods", ""),
            &RequestInfo::default(),
        )
        .await;
    assert!(decision.is_audited());
    drop(request);

    let response = AuditedBody::wrap(
        axum::response::Response::new(Body::from("payload")),
        h.auditor.clone(),
        decision,
    );
    assert_eq!(read_body(response).await, "payload");

    next_event(&mut h.rx).await;
    assert_no_event(&mut h.rx).await;
}

#[tokio::test]
async fn test_flush_waits_for_finalizing_events() {
    let mut h = harness(Level::Metadata, false);

    for _ in 0..3 {
        let response = router(h.auditor.clone())
            .oneshot(request(Method::GET, "/api/v1/namespaces/dev/pods", ""))
            .await
            .unwrap();
        read_body(response).await;
    }
    h.auditor.flush().await;

    for _ in 0..3 {
        assert!(h.rx.try_recv().is_ok(), "event not queued before flush returned");
    }
}

#[test]
fn test_frame_writer_counts_bytes() {
    let mut capture = ResponseCapture::new(FrameWriter::default());
    capture.write(b"abc").unwrap();
    capture.write(b"de").unwrap();

    assert_eq!(capture.get_ref().written(), 5);
    assert_eq!(capture.get_ref().status(), Some(StatusCode::OK));
    assert_eq!(capture.bytes(), b"abcde");
    assert!(ResponseWriter::hijacker(&mut FrameWriter::default()).is_none());
}

#[test]
fn test_not_audited_decision_has_no_event() {
    assert!(AuditDecision::NotAudited.event().is_none());
}

//! Request auditing
//!
//! Every request passing through [`AuditLayer`] may produce one [`Event`].
//! Whether it does, and how much of the request and response it records,
//! is decided per request by the audit level held in the webhook store.
//!
//! # Architecture
//!
//! - [`AuditPolicy`] reads the current level from a [`WebhookStore`]
//! - [`Auditor`] builds the event before the handler runs and finalizes it
//!   from a [`ResponseCapture`] afterwards
//! - [`DeliveryQueue`] buffers finished events with a bounded wait
//! - [`Backend`] drains the queue into an [`AuditSink`]
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use axum::Router;
//! use tokio_util::sync::CancellationToken;
//! use apiaudit_server::audit::{
//!     AuditLayer, Auditor, InMemoryProjectRegistry, InMemoryWebhookStore, LogSink, QueueConfig,
//! };
//!
//! # async fn example() {
//! let shutdown = CancellationToken::new();
//! let (auditor, backend) = Auditor::start(
//!     Arc::new(InMemoryWebhookStore::new()),
//!     Arc::new(InMemoryProjectRegistry::default()),
//!     Arc::new(LogSink),
//!     QueueConfig::default(),
//!     Duration::from_secs(5),
//!     shutdown.clone(),
//! );
//!
//! let app: Router = Router::new().layer(AuditLayer::new(auditor));
//! # shutdown.cancel();
//! # let _ = backend.await;
//! # }
//! ```

mod auditor;
mod backend;
mod capture;
mod event;
mod level;
mod middleware;
mod projects;
mod queue;
mod sink;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod middleware_tests;

pub use auditor::{AuditDecision, Auditor};
pub use backend::{Backend, DEFAULT_SHUTDOWN_GRACE};
pub use capture::{
    Capability, CaptureError, CloseNotify, Connection, Hijack, ResponseCapture, ResponseWriter,
};
pub use event::{
    Event, EventList, ObjectReference, RawObject, ResponseStatus, Stage, UserInfo, Verb,
};
pub use level::{AuditPolicy, InMemoryWebhookStore, StoreError, Webhook, WebhookStore, DEFAULT_WEBHOOK};
pub use middleware::{AuditLayer, AuditMiddleware, AuditedBody, FrameWriter};
pub use projects::{
    DevOpsProject, InMemoryProjectRegistry, ProjectLister, Query, RegistryError, WORKSPACE_LABEL,
};
pub use queue::{
    DeliveryQueue, EventReceiver, QueueConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TIMEOUT,
};
pub use sink::{
    AuditSink, LogSink, SinkError, WebhookSink, DEFAULT_WEBHOOK_TIMEOUT_SECS, EVENT_LOG_TARGET,
};

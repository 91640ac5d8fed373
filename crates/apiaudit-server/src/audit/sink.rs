//! Audit event sinks
//!
//! The backend hands each event to exactly one [`AuditSink`]. Sinks report
//! failures but never retry; the backend logs and moves on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info};

use super::event::{Event, EventList};

// ============================================================================
// Sink Constants
// ============================================================================

/// Default timeout for a single webhook delivery in seconds.
/// Can be overridden via AUDIT_WEBHOOK_TIMEOUT_SECS.
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Tracing target used by [`LogSink`]
pub const EVENT_LOG_TARGET: &str = "apiaudit::events";

const WEBHOOK_USER_AGENT: &str = concat!("apiaudit/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook rejected events with status {0}")]
    Status(StatusCode),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Downstream receiver of audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn submit(&self, event: Event) -> Result<(), SinkError>;
}

/// Writes each event as one structured log line
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl AuditSink for LogSink {
    async fn submit(&self, event: Event) -> Result<(), SinkError> {
        let payload = serde_json::to_string(&event)?;
        info!(
            target: EVENT_LOG_TARGET,
            audit_id = %event.audit_id,
            verb = %event.verb,
            user = %event.user.username,
            event = %payload,
            "audit event"
        );
        Ok(())
    }
}

/// Posts events to an HTTP receiver as an `EventList`
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(WEBHOOK_USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AuditSink for WebhookSink {
    async fn submit(&self, event: Event) -> Result<(), SinkError> {
        let audit_id = event.audit_id;
        let batch = EventList { items: vec![event] };

        let response = self.client.post(&self.url).json(&batch).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status));
        }

        debug!(%audit_id, status = status.as_u16(), "audit event delivered");
        Ok(())
    }
}

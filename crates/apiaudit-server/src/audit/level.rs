//! Audit level policy
//!
//! The audit level lives on a singleton webhook configuration object that is
//! owned and mutated elsewhere. Every decision re-reads it, so level changes
//! apply to the next request without restarting the pipeline.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use apiaudit_common::types::Level;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Name of the webhook object holding the audit configuration
pub const DEFAULT_WEBHOOK: &str = "kube-auditing-webhook";

/// Audit webhook configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Webhook {
    pub audit_level: Level,
    pub k8s_auditing_enabled: bool,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("webhook {0} not found")]
    NotFound(String),

    #[error("webhook store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to webhook configuration objects
pub trait WebhookStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Webhook, StoreError>;
}

/// Webhook store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryWebhookStore {
    webhooks: RwLock<HashMap<String, Webhook>>,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the default webhook
    pub fn with_default(webhook: Webhook) -> Self {
        let store = Self::new();
        store.set(DEFAULT_WEBHOOK, webhook);
        store
    }

    pub fn set(&self, name: impl Into<String>, webhook: Webhook) {
        // Writes proceed through a poisoned lock.
        let mut webhooks = self.webhooks.write().unwrap_or_else(|e| e.into_inner());
        webhooks.insert(name.into(), webhook);
    }

    pub fn remove(&self, name: &str) -> Option<Webhook> {
        let mut webhooks = self.webhooks.write().unwrap_or_else(|e| e.into_inner());
        webhooks.remove(name)
    }
}

impl WebhookStore for InMemoryWebhookStore {
    fn get(&self, name: &str) -> Result<Webhook, StoreError> {
        let webhooks = self
            .webhooks
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        webhooks
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

/// Decides whether auditing is on and at which level
#[derive(Clone)]
pub struct AuditPolicy {
    store: Arc<dyn WebhookStore>,
}

impl AuditPolicy {
    pub fn new(store: Arc<dyn WebhookStore>) -> Self {
        Self { store }
    }

    /// Current audit level. Any lookup failure means `Level::None`.
    pub fn level(&self) -> Level {
        match self.store.get(DEFAULT_WEBHOOK) {
            Ok(webhook) => webhook.audit_level,
            Err(e) => {
                trace!(error = %e, "audit webhook lookup failed, auditing disabled");
                Level::None
            },
        }
    }

    pub fn enabled(&self) -> bool {
        self.level() >= Level::Metadata
    }

    pub fn k8s_auditing_enabled(&self) -> bool {
        match self.store.get(DEFAULT_WEBHOOK) {
            Ok(webhook) => webhook.k8s_auditing_enabled,
            Err(e) => {
                trace!(error = %e, "audit webhook lookup failed, kubernetes auditing disabled");
                false
            },
        }
    }
}

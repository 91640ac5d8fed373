//! HTTP routes served next to the audited application
//!
//! - `GET /health`: liveness plus the current audit level
//! - `GET /audit/stats`: delivery queue depth, capacity and drop count
//! - `GET /audit/level`, `PUT /audit/level`: read or change the audit webhook
//!
//! Changing the level needs `Authorization: Bearer <AUDIT_ADMIN_TOKEN>`.
//! Without a configured token the level is fixed for the life of the process.

use std::str::FromStr;
use std::sync::Arc;

use apiaudit_common::types::Level;
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Uri},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::audit::{AuditLayer, Auditor, InMemoryWebhookStore, Webhook, WebhookStore, DEFAULT_WEBHOOK};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::middleware;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auditor: Auditor,
    pub webhooks: Arc<InMemoryWebhookStore>,
    /// Token guarding `PUT /audit/level`
    pub admin_token: Option<Arc<str>>,
}

/// Caller presented the admin bearer token
pub struct AdminAccess;

#[async_trait]
impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            return Err(AppError::Forbidden(
                "Audit level changes are disabled on this server".to_string(),
            ));
        };

        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match presented {
            Some(token) if tokens_match(token.trim(), expected) => Ok(AdminAccess),
            Some(_) => Err(AppError::Unauthorized("Invalid admin token".to_string())),
            None => Err(AppError::Unauthorized("Missing admin token".to_string())),
        }
    }
}

/// Comparison time depends only on the lengths.
fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// Body of `PUT /audit/level`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelUpdate {
    pub level: String,
    #[serde(default)]
    pub k8s_auditing_enabled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub dropped: u64,
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState, config: &Config) -> Router {
    let audit = AuditLayer::new(state.auditor.clone());

    Router::new()
        .route("/health", get(health_check))
        .route("/audit/stats", get(audit_stats))
        .route("/audit/level", get(get_level).put(set_level))
        .fallback(not_found)
        .with_state(state)
        // Apply layers from innermost to outermost
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
        .layer(audit)
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "audit": {
            "enabled": state.auditor.enabled(),
            "level": state.auditor.level(),
        }
    }))
}

async fn audit_stats(State(state): State<AppState>) -> Json<Value> {
    let queue = state.auditor.queue();
    Json(json!({
        "level": state.auditor.level(),
        "enabled": state.auditor.enabled(),
        "queue": QueueStats {
            depth: queue.depth(),
            capacity: queue.capacity(),
            dropped: queue.dropped(),
        },
    }))
}

async fn get_level(State(state): State<AppState>) -> AppResult<Json<Webhook>> {
    let webhook = state
        .webhooks
        .get(DEFAULT_WEBHOOK)
        .map_err(|e| AppError::NotFound(e.to_string()))?;
    Ok(Json(webhook))
}

async fn set_level(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Json(update): Json<LevelUpdate>,
) -> AppResult<Json<Webhook>> {
    let level = Level::from_str(&update.level)?;

    let k8s_auditing_enabled = match update.k8s_auditing_enabled {
        Some(enabled) => enabled,
        None => state.auditor.k8s_auditing_enabled(),
    };
    let webhook = Webhook {
        audit_level: level,
        k8s_auditing_enabled,
    };

    state.webhooks.set(DEFAULT_WEBHOOK, webhook.clone());
    info!(level = %level, k8s_auditing_enabled, "Audit level updated");

    Ok(Json(webhook))
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}

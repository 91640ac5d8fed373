//! Configuration management

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use apiaudit_common::types::Level;
use serde::{Deserialize, Serialize};

use crate::audit::{QueueConfig, Webhook, DEFAULT_CACHE_CAPACITY, DEFAULT_WEBHOOK_TIMEOUT_SECS};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Audit Configuration Constants
// ============================================================================

/// Default audit level seeded into the webhook store.
pub const DEFAULT_AUDIT_LEVEL: Level = Level::Metadata;

/// Default wait for a free queue slot in milliseconds.
pub const DEFAULT_AUDIT_CACHE_TIMEOUT_MS: u64 = 1_000;

/// Default time the backend keeps draining after shutdown, in seconds.
pub const DEFAULT_AUDIT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub audit: AuditConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Audit pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Initial level of the audit webhook
    pub level: Level,
    /// Whether the Kubernetes API server audits its own requests
    pub k8s_auditing_enabled: bool,
    pub cache_capacity: usize,
    pub cache_timeout_ms: u64,
    pub shutdown_grace_secs: u64,
    /// Receiver for audit events; events are logged when unset
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    /// Bearer token required to change the audit level; changes are refused when unset
    #[serde(skip_serializing)]
    pub admin_token: Option<String>,
}

impl AuditConfig {
    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.cache_capacity,
            timeout: Duration::from_millis(self.cache_timeout_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Webhook object the store is seeded with
    pub fn webhook(&self) -> Webhook {
        Webhook {
            audit_level: self.level,
            k8s_auditing_enabled: self.k8s_auditing_enabled,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Build configuration from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        let level = match std::env::var("AUDIT_LEVEL") {
            Ok(value) => Level::from_str(&value)
                .with_context(|| format!("Invalid AUDIT_LEVEL '{value}'"))?,
            Err(_) => DEFAULT_AUDIT_LEVEL,
        };

        let config = Config {
            server: ServerConfig {
                host: std::env::var("APIAUDIT_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("APIAUDIT_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "APIAUDIT_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true),
            },
            audit: AuditConfig {
                level,
                k8s_auditing_enabled: env_or("AUDIT_K8S_ENABLED", false),
                cache_capacity: env_or("AUDIT_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY),
                cache_timeout_ms: env_or("AUDIT_CACHE_TIMEOUT_MS", DEFAULT_AUDIT_CACHE_TIMEOUT_MS),
                shutdown_grace_secs: env_or(
                    "AUDIT_SHUTDOWN_GRACE_SECS",
                    DEFAULT_AUDIT_SHUTDOWN_GRACE_SECS,
                ),
                webhook_url: std::env::var("AUDIT_WEBHOOK_URL")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                webhook_timeout_secs: env_or(
                    "AUDIT_WEBHOOK_TIMEOUT_SECS",
                    DEFAULT_WEBHOOK_TIMEOUT_SECS,
                ),
                admin_token: std::env::var("AUDIT_ADMIN_TOKEN")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.audit.cache_capacity == 0 {
            anyhow::bail!("Audit cache capacity must be greater than 0");
        }

        if self.audit.cache_timeout_ms == 0 {
            anyhow::bail!("Audit cache timeout must be greater than 0");
        }

        if let Some(url) = &self.audit.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("Audit webhook URL must be http(s), got '{}'", url);
            }
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            audit: AuditConfig {
                level: DEFAULT_AUDIT_LEVEL,
                k8s_auditing_enabled: false,
                cache_capacity: DEFAULT_CACHE_CAPACITY,
                cache_timeout_ms: DEFAULT_AUDIT_CACHE_TIMEOUT_MS,
                shutdown_grace_secs: DEFAULT_AUDIT_SHUTDOWN_GRACE_SECS,
                webhook_url: None,
                webhook_timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
                admin_token: None,
            },
        }
    }
}

//! apiaudit server - main entry point

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use apiaudit_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use apiaudit_server::{
    audit::{AuditSink, Auditor, InMemoryProjectRegistry, InMemoryWebhookStore, LogSink, WebhookSink},
    config::Config,
    routes::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("apiaudit-server")
        .filter_directives("apiaudit_server=debug,apiaudit::events=info,tower_http=debug")
        .build()
        // Environment variables take precedence
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting apiaudit server");

    let config = Config::load()?;
    info!(
        level = %config.audit.level,
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let sink: Arc<dyn AuditSink> = match &config.audit.webhook_url {
        Some(url) => {
            info!(url = %url, "Delivering audit events to webhook");
            Arc::new(WebhookSink::new(url.clone(), config.audit.webhook_timeout())?)
        },
        None => {
            info!("No audit webhook configured, audit events will be logged");
            Arc::new(LogSink)
        },
    };

    let webhooks = Arc::new(InMemoryWebhookStore::with_default(config.audit.webhook()));
    let shutdown = CancellationToken::new();
    let (auditor, backend) = Auditor::start(
        webhooks.clone(),
        Arc::new(InMemoryProjectRegistry::default()),
        sink,
        config.audit.queue(),
        config.audit.shutdown_grace(),
        shutdown.clone(),
    );

    if config.audit.admin_token.is_none() {
        info!("AUDIT_ADMIN_TOKEN not set, audit level changes are disabled");
    }
    let state = AppState {
        auditor: auditor.clone(),
        webhooks,
        admin_token: config.audit.admin_token.as_deref().map(Arc::from),
    };
    let app = routes::create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped accepting requests, flushing audit events");
    if tokio::time::timeout(config.audit.shutdown_grace(), auditor.flush()).await.is_err() {
        warn!("Responses still finalizing after grace period, their events may be dropped");
    }
    shutdown.cancel();

    let flush_timeout = config.audit.shutdown_grace() + Duration::from_secs(config.server.shutdown_timeout_secs);
    match tokio::time::timeout(flush_timeout, backend).await {
        Ok(Ok(())) => info!("Audit backend stopped"),
        Ok(Err(e)) => warn!(error = %e, "Audit backend task failed"),
        Err(_) => warn!("Audit backend did not stop in time"),
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

//! Delivery backend
//!
//! A single task drains the delivery queue into the configured sink until the
//! shutdown token fires or every producer has gone away. On shutdown it
//! keeps draining for a bounded grace period and then gives up on whatever
//! is left.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::event::Event;
use super::queue::EventReceiver;
use super::sink::AuditSink;

/// Default drain period once shutdown is signalled
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Backend {
    sink: Arc<dyn AuditSink>,
    shutdown_grace: Duration,
}

impl Backend {
    pub fn new(sink: Arc<dyn AuditSink>, shutdown_grace: Duration) -> Self {
        Self {
            sink,
            shutdown_grace,
        }
    }

    /// Start the worker task. The handle resolves once the queue is drained
    /// or abandoned.
    pub fn spawn(self, receiver: EventReceiver, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver, shutdown))
    }

    async fn run(self, mut receiver: EventReceiver, shutdown: CancellationToken) {
        info!("Audit backend started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.drain(receiver).await;
                    return;
                }

                event = receiver.recv() => match event {
                    Some(event) => self.deliver(event).await,
                    None => {
                        info!("Audit queue closed, backend stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn deliver(&self, event: Event) {
        let audit_id = event.audit_id;
        if let Err(e) = self.sink.submit(event).await {
            error!(%audit_id, error = %e, "Failed to deliver audit event");
        }
    }

    async fn drain(&self, mut receiver: EventReceiver) {
        receiver.close();
        info!(pending = receiver.len(), "Audit backend shutting down, draining queue");

        let deadline = Instant::now() + self.shutdown_grace;
        let mut delivered = 0usize;

        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(event) = receiver.recv().await {
                self.deliver(event).await;
                delivered += 1;
            }
        })
        .await;

        if drained.is_ok() {
            info!(delivered, "Audit queue drained");
            return;
        }

        let mut discarded = 0usize;
        while receiver.try_recv().is_ok() {
            discarded += 1;
        }
        warn!(delivered, discarded, "Audit shutdown grace period elapsed, events discarded");
    }
}

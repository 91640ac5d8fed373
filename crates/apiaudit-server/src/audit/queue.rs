//! Bounded delivery queue between request handlers and the backend
//!
//! Handlers push finished events; a single backend task drains them. When the
//! buffer is full a handler waits at most `timeout` for a free slot and then
//! drops its event, so a slow sink can cost a request no more than that bound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, trace, warn};

use super::event::Event;

/// Default number of buffered events
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Default wait for a free slot before an event is dropped
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: usize,
    pub timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            timeout: DEFAULT_CACHE_TIMEOUT,
        }
    }
}

/// Consumer side, owned by the backend
pub type EventReceiver = mpsc::Receiver<Event>;

/// Producer side, shared by all request handlers
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<Event>,
    timeout: Duration,
    dropped: Arc<AtomicU64>,
}

impl DeliveryQueue {
    /// Create the queue and the receiver the backend drains.
    ///
    /// A zero capacity is raised to one slot.
    pub fn new(config: QueueConfig) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let queue = Self {
            sender,
            timeout: config.timeout,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (queue, receiver)
    }

    /// Enqueue `event`, waiting up to the configured timeout for room.
    ///
    /// Never fails: an event that cannot be queued is counted and dropped.
    pub async fn enqueue(&self, event: Event) {
        let audit_id = event.audit_id;

        match self.sender.send_timeout(event, self.timeout).await {
            Ok(()) => trace!(%audit_id, "audit event enqueued"),
            Err(SendTimeoutError::Timeout(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%audit_id, timeout = ?self.timeout, "cache audit event timeout, event dropped");
            },
            Err(SendTimeoutError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(%audit_id, "audit backend stopped, event dropped");
            },
        }
    }

    /// Events dropped since the queue was created
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events currently buffered
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

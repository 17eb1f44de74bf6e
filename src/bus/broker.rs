//! Subscriber fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ControlPlaneEvent;

/// Per-subscriber channel capacity. Small and fixed: a subscriber that
/// cannot keep up loses events at this boundary rather than stalling the
/// forwarders.
pub const SUBSCRIBER_BUFFER: usize = 16;

type SubscriberMap = Arc<Mutex<HashMap<u64, mpsc::Sender<ControlPlaneEvent>>>>;

/// Holds the set of subscriber channels and delivers published envelopes to
/// all of them.
pub struct Broker {
    subscribers: SubscriberMap,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a subscriber scoped to `token`: the returned channel closes
    /// when the token fires (or when the broker shuts down).
    pub fn subscribe(&self, token: CancellationToken) -> mpsc::Receiver<ControlPlaneEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, tx);

        let shutdown = self.shutdown.clone();
        let subscribers = Arc::clone(&self.subscribers);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = shutdown.cancelled() => {}
            }
            // Dropping the sender closes the subscriber's receiver.
            subscribers.lock().remove(&id);
        });

        rx
    }

    /// Deliver to every subscriber. Non-blocking: a full subscriber buffer
    /// drops this event for that subscriber only.
    pub fn publish(&self, event: &ControlPlaneEvent) {
        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.lock();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(subscriber = id, "subscriber buffer full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in dead {
                subscribers.remove(&id);
            }
        }
    }

    /// Drop every subscriber channel and stop accepting new subscriptions'
    /// cleanup tasks from lingering.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.subscribers.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

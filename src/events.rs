//! Reactive change bus (C14).
//!
//! Built on `tokio::sync::broadcast`, whose lagged-receiver semantics already
//! match the spec's back-pressure discipline exactly: bounded capacity,
//! drop-oldest-on-overflow, never blocks the producer. `Subscription` wraps
//! the raw receiver and folds `RecvError::Lagged(n)` into a running drop
//! counter instead of surfacing it as an error to callers.

use tokio::sync::broadcast;

use crate::value::Entity;

#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Created {
        collection: String,
        entity: Entity,
    },
    Updated {
        collection: String,
        before: Entity,
        after: Entity,
    },
    Deleted {
        collection: String,
        entity: Entity,
    },
    Reload {
        collection: String,
    },
    ReloadFailed {
        collection: String,
        message: String,
    },
}

impl ChangeEvent {
    pub fn collection(&self) -> &str {
        match self {
            ChangeEvent::Created { collection, .. }
            | ChangeEvent::Updated { collection, .. }
            | ChangeEvent::Deleted { collection, .. }
            | ChangeEvent::Reload { collection }
            | ChangeEvent::ReloadFailed { collection, .. } => collection,
        }
    }
}

/// Capacity-bounded pub/sub for `ChangeEvent`s, shared by every collection in
/// a database.
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Best-effort publish: with no subscribers, the event is simply
    /// dropped, which is never an error for a producer.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.sender.subscribe(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One consumer's view of the bus. Tracks how many events it has missed to
/// lag, since `broadcast` silently drops the oldest entries rather than
/// blocking the publisher.
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    dropped: u64,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

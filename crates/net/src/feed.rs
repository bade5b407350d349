//! In-process change feed
//!
//! Fans committed changes out to subscribers scoped by entity kind and
//! filter key. Delivery is per-subscriber FIFO, so changes to one entity
//! arrive in commit order; nothing is promised across subscriptions.

use std::sync::Mutex;

use pointroom_core::{ChangeEvent, ChangeSink, EntityKind, FilterKey};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::RawChange;

/// Identifies a live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    entity: EntityKind,
    filter: FilterKey,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

struct FeedState {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Stream of changes for one (entity kind, filter key) pair
pub struct Subscription {
    id: SubscriptionId,
    entity: EntityKind,
    filter: FilterKey,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn filter(&self) -> FilterKey {
        self.filter
    }

    /// Wait for the next change. `None` once unsubscribed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Take a change if one is already queued
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

/// Change feed hub
pub struct ChangeFeed {
    state: Mutex<FeedState>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FeedState {
                next_id: 1,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to changes of one entity kind under a filter key
    pub fn subscribe(&self, entity: EntityKind, filter: FilterKey) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.subscribers.push(Subscriber {
            id,
            entity,
            filter,
            tx,
        });
        debug!(subscription = id.0, ?entity, filter = %filter.0, "Subscribed");

        Subscription {
            id,
            entity,
            filter,
            rx,
        }
    }

    /// Remove a subscription. Its stream ends once drained.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != id);
        let removed = state.subscribers.len() != before;
        if removed {
            debug!(subscription = id.0, "Unsubscribed");
        }
        removed
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Deliver a typed change to every matching subscriber.
    /// Returns how many subscribers received it.
    pub fn deliver(&self, event: &ChangeEvent) -> usize {
        let entity = event.entity();
        let filter = event.filter_key();
        let mut delivered = 0;

        let mut state = self.lock();
        state.subscribers.retain(|s| {
            if s.entity != entity || s.filter != filter {
                return !s.tx.is_closed();
            }
            match s.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                // Receiver dropped without unsubscribing
                Err(_) => false,
            }
        });
        delivered
    }

    /// Decode a raw transport payload and deliver it
    pub fn deliver_raw(&self, bytes: &[u8]) -> Result<usize> {
        let event = RawChange::from_bytes(bytes)?.decode().map_err(|e| {
            warn!(error = %e, "Dropping undecodable change payload");
            e
        })?;
        Ok(self.deliver(&event))
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSink for ChangeFeed {
    fn publish(&self, event: ChangeEvent) {
        self.deliver(&event);
    }
}

/// Wait on a subscription that may not exist yet
pub async fn next_or_pending(subscription: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match subscription {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

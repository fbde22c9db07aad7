//! Per-session event fan-out
//!
//! Flushed events are delivered to subscription channels in flush order.
//! The registry is owned by one adapter; cancellation is idempotent and
//! never disturbs sibling subscriptions on the same session.

use crate::types::{CancelHandle, NormalizedEvent, Subscription};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

type SubscriberMap = HashMap<uuid::Uuid, mpsc::UnboundedSender<NormalizedEvent>>;

/// Session id -> live subscription senders
#[derive(Default)]
pub struct SubscriberRegistry {
    sessions: RwLock<HashMap<String, SubscriberMap>>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a subscription for one session
    pub fn subscribe(
        self: &Arc<Self>,
        provider_id: &str,
        session_id: &str,
    ) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = uuid::Uuid::new_v4();
        self.sessions
            .write()
            .entry(session_id.to_string())
            .or_default()
            .insert(id, tx);

        Subscription {
            id,
            provider_id: provider_id.to_string(),
            session_id: session_id.to_string(),
            events: rx,
            cancel: CancelHandle {
                session_id: session_id.to_string(),
                subscription_id: id,
                registry: Arc::downgrade(self),
            },
        }
    }

    /// Remove one subscription. Idempotent; unknown ids are a no-op.
    pub fn remove(&self, session_id: &str, id: uuid::Uuid) {
        let mut sessions = self.sessions.write();
        if let Some(map) = sessions.get_mut(session_id) {
            map.remove(&id);
            if map.is_empty() {
                sessions.remove(session_id);
            }
        }
    }

    /// Deliver one flushed event to every subscriber of its session.
    ///
    /// Senders are cloned under the read lock and used after releasing it:
    /// an unsubscribe racing this dispatch either misses the event entirely
    /// or receives this one final delivery, never more.
    pub fn dispatch(&self, event: NormalizedEvent) {
        let targets: Vec<mpsc::UnboundedSender<NormalizedEvent>> = {
            let sessions = self.sessions.read();
            match sessions.get(&event.session_id) {
                Some(map) => map.values().cloned().collect(),
                None => return,
            }
        };

        for tx in targets {
            let _ = tx.send(event.clone());
        }
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

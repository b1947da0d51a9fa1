//! # RSP Bus - In-Process Topic Fan-Out
//!
//! ## Purpose
//! Synchronous topic-based publish/subscribe used to decouple optional
//! subsystems (monitoring, a future GUI module) from producers. Delivery is
//! in-memory, in subscription order, and best-effort - there is no queueing,
//! persistence or replay.
//!
//! ## Architecture Role
//! ```text
//! Producers → [Bus] → ordered subscriber callbacks
//!                ↑
//!        owned instance, passed through constructors
//! ```
//!
//! A `Bus` is an explicit instance owned by the runtime rather than
//! process-global state, so tests and embedded deployments get isolated
//! fan-out domains.
//!
//! ## Semantics
//! - `subscribe` is idempotent per `(topic, subscriber-id)` pair
//! - `publish` invokes current subscribers synchronously, in subscription
//!   order; a topic with no subscribers is a diagnostic, not a failure
//! - `unsubscribe` of an absent pair is a logged no-op

use parking_lot::Mutex;
use rsp_codec::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message delivered to subscribers
///
/// Mirrors the shape of host traffic: a name plus an optional value
/// (`None` for pure command/broadcast events).
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Sensor or event name
    pub name: String,
    /// Value for sensor updates, `None` for events
    pub value: Option<Value>,
}

impl BusMessage {
    /// Event-shaped message without a value
    pub fn event(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Value-shaped message
    pub fn value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// Subscriber callback type
pub type Receiver = Arc<dyn Fn(&BusMessage) + Send + Sync>;

struct Subscription {
    id: String,
    receiver: Receiver,
}

/// In-process publish/subscribe bus
///
/// Cheap to clone; clones share the same subscriber table.
#[derive(Clone, Default)]
pub struct Bus {
    topics: Arc<Mutex<HashMap<String, Vec<Subscription>>>>,
}

impl Bus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `receiver` under `id` to `topic`
    ///
    /// Re-subscribing the same `(topic, id)` pair is a no-op; the original
    /// receiver and its position in delivery order are kept.
    pub fn subscribe(&self, topic: &str, id: &str, receiver: Receiver) {
        let mut topics = self.topics.lock();
        let subs = topics.entry(topic.to_string()).or_default();
        if subs.iter().any(|s| s.id == id) {
            info!(topic, id, "subscribe: already known");
            return;
        }
        subs.push(Subscription {
            id: id.to_string(),
            receiver,
        });
        debug!(topic, id, "subscribed");
    }

    /// Remove the `(topic, id)` subscription if present
    pub fn unsubscribe(&self, topic: &str, id: &str) {
        let mut topics = self.topics.lock();
        match topics.get_mut(topic) {
            Some(subs) => {
                let before = subs.len();
                subs.retain(|s| s.id != id);
                if subs.len() == before {
                    warn!(topic, id, "unsubscribe: pair not registered");
                } else {
                    debug!(topic, id, "unsubscribed");
                }
                if subs.is_empty() {
                    topics.remove(topic);
                }
            }
            None => warn!(topic, id, "unsubscribe: topic not registered"),
        }
    }

    /// Deliver `message` to every current subscriber of `topic`
    ///
    /// Receivers run synchronously on the caller's thread, in subscription
    /// order. The subscriber list is snapshotted up front so a receiver may
    /// subscribe or unsubscribe without deadlocking the bus.
    pub fn publish(&self, topic: &str, message: &BusMessage) {
        let receivers: Vec<Receiver> = {
            let topics = self.topics.lock();
            match topics.get(topic) {
                Some(subs) => subs.iter().map(|s| Arc::clone(&s.receiver)).collect(),
                None => Vec::new(),
            }
        };

        if receivers.is_empty() {
            debug!(topic, "publish: no subscribers");
            return;
        }
        for receiver in receivers {
            receiver(message);
        }
    }

    /// Number of subscribers currently registered on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, |s| s.len())
    }
}

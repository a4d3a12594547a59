//! Notify subscription registry.
//!
//! Maps an event name to the list of subscribers interested in it. Each
//! subscriber is an unbounded channel, so one slow or dead consumer never
//! blocks delivery to the others. The wildcard name `"*"` matches every
//! event.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;

use crate::domain::NotifyEvent;

/// Event name that matches every notify event.
pub const WILDCARD: &str = "*";

/// Identifies one registration so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Delivery side of a subscription.
pub type NotifySender = mpsc::UnboundedSender<NotifyEvent>;

/// Event name → subscriber list.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_event: HashMap<String, Vec<(SubscriberId, NotifySender)>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` for `event`. Use [`WILDCARD`] for all events.
    pub fn subscribe(&mut self, event: String, id: SubscriberId, sender: NotifySender) {
        self.by_event.entry(event).or_default().push((id, sender));
    }

    /// Removes one registration. Returns `true` if it existed.
    pub fn unsubscribe(&mut self, event: &str, id: SubscriberId) -> bool {
        let Some(subscribers) = self.by_event.get_mut(event) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            self.by_event.remove(event);
        }
        removed
    }

    /// Delivers `event` to every matching subscriber.
    ///
    /// Subscribers whose receiving side is gone are pruned; the rest still
    /// receive the event. Returns the number of successful deliveries.
    pub fn publish(&mut self, event: &NotifyEvent) -> usize {
        let mut delivered = deliver(self.by_event.get_mut(event.event.as_str()), event);
        if event.event != WILDCARD {
            delivered += deliver(self.by_event.get_mut(WILDCARD), event);
        }
        self.by_event.retain(|_, subscribers| !subscribers.is_empty());
        delivered
    }

    /// Number of subscribers registered for exactly `event`.
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.by_event.get(event).map_or(0, Vec::len)
    }

    /// Total number of registrations.
    #[must_use]
    pub fn total(&self) -> usize {
        self.by_event.values().map(Vec::len).sum()
    }
}

fn deliver(subscribers: Option<&mut Vec<(SubscriberId, NotifySender)>>, event: &NotifyEvent) -> usize {
    let Some(subscribers) = subscribers else {
        return 0;
    };
    let mut delivered = 0;
    subscribers.retain(|(id, sender)| {
        if sender.send(event.clone()).is_ok() {
            delivered += 1;
            true
        } else {
            tracing::debug!(subscriber = %id, event = %event.event, "pruning closed subscriber");
            false
        }
    });
    delivered
}

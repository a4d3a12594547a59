//! Server-initiated push messages as delivered to subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A NOTIFY frame after dispatch.
///
/// Not tied to any request id. Cloned once per subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotifyEvent {
    /// Event name, e.g. `"machine.updated"`.
    pub event: String,
    /// Event payload as sent by the server.
    pub payload: Value,
    /// When the frame was dispatched.
    pub received_at: DateTime<Utc>,
}

impl NotifyEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event: String, payload: Value) -> Self {
        Self {
            event,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Splits a dotted event name into `(entity, action)`.
    ///
    /// `"machine.updated"` yields `("machine", Some("updated"))`.
    #[must_use]
    pub fn parts(&self) -> (&str, Option<&str>) {
        match self.event.split_once('.') {
            Some((entity, action)) => (entity, Some(action)),
            None => (self.event.as_str(), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parts_split_on_first_dot() {
        let ev = NotifyEvent::new("machine.updated".into(), json!({}));
        assert_eq!(ev.parts(), ("machine", Some("updated")));

        let bare = NotifyEvent::new("heartbeat".into(), Value::Null);
        assert_eq!(bare.parts(), ("heartbeat", None));
    }
}

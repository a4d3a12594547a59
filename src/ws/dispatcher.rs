//! Inbound frame routing.
//!
//! [`Dispatcher`] owns the pending map and the subscription registry. Every
//! inbound text frame is parsed once and either settles the matching
//! pending request or fans out to notify subscribers.

use serde_json::Value;

use super::messages::InboundFrame;
use super::subscription::{NotifySender, SubscriberId, SubscriptionRegistry};
use crate::domain::{NotifyEvent, PendingRequest, PendingRequests, RequestId};
use crate::error::{ClientError, RemoteErrorBody};

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// A pending request was resolved with a result.
    Resolved(RequestId),
    /// A pending request was rejected with a remote error.
    Rejected(RequestId),
    /// The matching caller had already stopped waiting.
    Abandoned(RequestId),
    /// No pending request had this id; the frame was dropped.
    Stale(RequestId),
    /// A notify frame was delivered to this many subscribers.
    Notified {
        /// Event name.
        event: String,
        /// Successful deliveries.
        delivered: usize,
    },
    /// The frame could not be parsed and was dropped.
    Malformed(String),
}

/// Routes inbound frames to pending requests and subscribers.
#[derive(Debug, Default)]
pub struct Dispatcher {
    pending: PendingRequests,
    subscriptions: SubscriptionRegistry,
}

impl Dispatcher {
    /// Creates a dispatcher with nothing pending and no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-flight request.
    ///
    /// A duplicate id is rejected straight back to its own caller.
    pub fn register(&mut self, request: PendingRequest) {
        if let Err(duplicate) = self.pending.insert(request) {
            tracing::error!(id = %duplicate.id, "correlation id already pending");
            let id = duplicate.id;
            duplicate.settle(Err(ClientError::Protocol(format!(
                "correlation id {id} already pending"
            ))));
        }
    }

    /// Adds a notify subscriber.
    pub fn subscribe(&mut self, event: String, id: SubscriberId, sender: NotifySender) {
        self.subscriptions.subscribe(event.clone(), id, sender);
        let listeners = self.subscriptions.count(&event);
        tracing::debug!(subscriber = %id, %event, listeners, "subscribed");
    }

    /// Removes a notify subscriber.
    pub fn unsubscribe(&mut self, event: &str, id: SubscriberId) {
        if self.subscriptions.unsubscribe(event, id) {
            let remaining = self.subscriber_count();
            tracing::debug!(subscriber = %id, event, remaining, "unsubscribed");
        }
    }

    /// Parses and dispatches a text frame.
    pub fn dispatch_text(&mut self, text: &str) -> Dispatched {
        match InboundFrame::parse(text) {
            Ok(frame) => {
                tracing::trace!(frame_type = ?frame.frame_type(), "inbound frame");
                self.dispatch(frame)
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed frame");
                Dispatched::Malformed(err.to_string())
            }
        }
    }

    /// Dispatches a parsed frame.
    pub fn dispatch(&mut self, frame: InboundFrame) -> Dispatched {
        match frame {
            InboundFrame::Response { id, result, error } => self.settle(id, result, error),
            InboundFrame::Notify { event, payload } => {
                let notify = NotifyEvent::new(event, payload);
                let delivered = self.subscriptions.publish(&notify);
                tracing::debug!(event = %notify.event, delivered, "notify dispatched");
                Dispatched::Notified {
                    event: notify.event,
                    delivered,
                }
            }
        }
    }

    /// Rejects every pending request with `make_err()`; returns the count.
    pub fn fail_all(&mut self, make_err: impl Fn() -> ClientError) -> usize {
        self.pending.reject_all(make_err)
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total number of notify registrations.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.total()
    }

    fn settle(&mut self, id: RequestId, result: Value, error: Option<Value>) -> Dispatched {
        let Some(request) = self.pending.take(id) else {
            let stale = ClientError::StaleResponse(id);
            tracing::warn!(%id, error = %stale, "discarding unmatched response");
            return Dispatched::Stale(id);
        };

        let method = request.method.clone();
        let elapsed_ms = request.age_ms();
        let (outcome, dispatched) = match error {
            Some(payload) => (
                Err(ClientError::Remote(RemoteErrorBody::from_payload(payload))),
                Dispatched::Rejected(id),
            ),
            None => (Ok(result), Dispatched::Resolved(id)),
        };

        if request.settle(outcome) {
            tracing::debug!(%id, %method, elapsed_ms, "request settled");
            dispatched
        } else {
            tracing::debug!(%id, %method, "caller stopped waiting before response");
            Dispatched::Abandoned(id)
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::RequestOutcome;
    use serde_json::json;
    use tokio::sync::{mpsc, oneshot};

    fn register(d: &mut Dispatcher, id: u64, method: &str) -> oneshot::Receiver<RequestOutcome> {
        let (tx, rx) = oneshot::channel();
        d.register(PendingRequest::new(RequestId::from(id), method.to_string(), tx));
        rx
    }

    #[tokio::test]
    async fn response_resolves_matching_request() {
        let mut d = Dispatcher::new();
        let rx = register(&mut d, 1, "machine.list");

        let out = d.dispatch_text(r#"{"id":1,"type":"response","result":[{"system_id":"abc"}]}"#);
        assert_eq!(out, Dispatched::Resolved(RequestId::from(1)));
        assert_eq!(d.pending_len(), 0);

        let Ok(Ok(result)) = rx.await else {
            panic!("expected resolved result");
        };
        assert_eq!(result, json!([{"system_id": "abc"}]));
    }

    #[tokio::test]
    async fn out_of_order_responses_match_by_id() {
        let mut d = Dispatcher::new();
        let rx1 = register(&mut d, 1, "zone.list");
        let rx2 = register(&mut d, 2, "pool.list");
        let rx3 = register(&mut d, 3, "vlan.list");

        for id in [3, 1, 2] {
            let text = json!({"id": id, "type": "response", "result": id}).to_string();
            assert_eq!(d.dispatch_text(&text), Dispatched::Resolved(RequestId::from(id)));
        }

        for (rx, expected) in [(rx1, 1), (rx2, 2), (rx3, 3)] {
            let Ok(Ok(value)) = rx.await else {
                panic!("request {expected} not resolved");
            };
            assert_eq!(value, json!(expected));
        }
    }

    #[tokio::test]
    async fn error_payload_rejects_only_its_request() {
        let mut d = Dispatcher::new();
        let rx_fail = register(&mut d, 1, "machine.delete");
        let rx_ok = register(&mut d, 2, "machine.list");

        let out = d.dispatch_text(
            r#"{"id":1,"type":"response","error":{"code":403,"message":"forbidden"}}"#,
        );
        assert_eq!(out, Dispatched::Rejected(RequestId::from(1)));
        assert_eq!(d.pending_len(), 1);

        let Ok(Err(ClientError::Remote(body))) = rx_fail.await else {
            panic!("expected remote error");
        };
        assert_eq!(body.code, Some(403));
        assert_eq!(body.message, "forbidden");

        d.dispatch_text(r#"{"id":2,"type":"response","result":[]}"#);
        assert!(matches!(rx_ok.await, Ok(Ok(_))));
    }

    #[test]
    fn unmatched_response_is_stale_and_harmless() {
        let mut d = Dispatcher::new();
        let _rx = register(&mut d, 1, "machine.list");

        let out = d.dispatch_text(r#"{"id":42,"type":"response","result":true}"#);
        assert_eq!(out, Dispatched::Stale(RequestId::from(42)));
        assert_eq!(d.pending_len(), 1);
    }

    #[test]
    fn duplicate_response_is_stale_the_second_time() {
        let mut d = Dispatcher::new();
        let _rx = register(&mut d, 1, "machine.list");
        let text = r#"{"id":1,"type":"response","result":1}"#;
        assert_eq!(d.dispatch_text(text), Dispatched::Resolved(RequestId::from(1)));
        assert_eq!(d.dispatch_text(text), Dispatched::Stale(RequestId::from(1)));
    }

    #[test]
    fn abandoned_caller_still_clears_entry() {
        let mut d = Dispatcher::new();
        drop(register(&mut d, 9, "machine.list"));
        let out = d.dispatch_text(r#"{"id":9,"type":"response","result":1}"#);
        assert_eq!(out, Dispatched::Abandoned(RequestId::from(9)));
        assert_eq!(d.pending_len(), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_rejects_newcomer() {
        let mut d = Dispatcher::new();
        let _first = register(&mut d, 1, "a");
        let second = register(&mut d, 1, "b");
        assert!(matches!(second.await, Ok(Err(ClientError::Protocol(_)))));
        assert_eq!(d.pending_len(), 1);
    }

    #[test]
    fn notify_does_not_touch_pending_requests() {
        let mut d = Dispatcher::new();
        let _rx = register(&mut d, 1, "machine.list");
        let (tx, mut sub) = mpsc::unbounded_channel();
        d.subscribe("machine.updated".into(), SubscriberId::new(1), tx);

        let out = d.dispatch_text(
            r#"{"type":"notify","event":"machine.updated","payload":{"system_id":"abc"}}"#,
        );
        assert_eq!(
            out,
            Dispatched::Notified {
                event: "machine.updated".into(),
                delivered: 1
            }
        );
        assert_eq!(d.pending_len(), 1);
        let Ok(ev) = sub.try_recv() else {
            panic!("subscriber missed notify");
        };
        assert_eq!(ev.payload, json!({"system_id": "abc"}));
    }

    #[test]
    fn unsubscribed_handler_receives_nothing() {
        let mut d = Dispatcher::new();
        let (tx, mut sub) = mpsc::unbounded_channel();
        d.subscribe("zone.created".into(), SubscriberId::new(4), tx);
        d.unsubscribe("zone.created", SubscriberId::new(4));
        assert_eq!(d.subscriber_count(), 0);

        d.dispatch_text(r#"{"type":"notify","event":"zone.created","payload":{}}"#);
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut d = Dispatcher::new();
        assert!(matches!(d.dispatch_text("{"), Dispatched::Malformed(_)));
        assert!(matches!(
            d.dispatch_text(r#"{"type":"mystery"}"#),
            Dispatched::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn fail_all_rejects_everything() {
        let mut d = Dispatcher::new();
        let receivers: Vec<_> = (1..=4).map(|id| register(&mut d, id, "machine.list")).collect();
        assert_eq!(d.fail_all(|| ClientError::ConnectionClosed), 4);
        assert_eq!(d.pending_len(), 0);
        for rx in receivers {
            assert!(matches!(rx.await, Ok(Err(ClientError::ConnectionClosed))));
        }
    }
}

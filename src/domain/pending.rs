//! The pending map: requests written to the socket and awaiting a response.
//!
//! [`PendingRequests`] is owned by the connection task and only ever
//! touched from it, so it is a plain `HashMap` with no interior locking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;

use super::RequestId;
use crate::error::ClientError;

/// Outcome delivered to the caller of [`crate::service::WsClient::send`].
pub type RequestOutcome = Result<Value, ClientError>;

/// One in-flight request.
#[derive(Debug)]
pub struct PendingRequest {
    /// Correlation id written in the request frame.
    pub id: RequestId,
    /// Method name, kept for logging when the response arrives.
    pub method: String,
    /// When the request was registered.
    pub created_at: DateTime<Utc>,
    reply: oneshot::Sender<RequestOutcome>,
}

impl PendingRequest {
    /// Creates a pending entry that settles through `reply`.
    #[must_use]
    pub fn new(id: RequestId, method: String, reply: oneshot::Sender<RequestOutcome>) -> Self {
        Self {
            id,
            method,
            created_at: Utc::now(),
            reply,
        }
    }

    /// Settles the caller's future with `outcome`.
    ///
    /// Returns `false` if the caller had already stopped waiting.
    pub fn settle(self, outcome: RequestOutcome) -> bool {
        self.reply.send(outcome).is_ok()
    }

    /// Milliseconds elapsed since the request was registered.
    #[must_use]
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }
}

/// Mapping from correlation id to in-flight request.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<RequestId, PendingRequest>,
}

impl PendingRequests {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request.
    ///
    /// # Errors
    ///
    /// Returns the entry back if its id is already pending. Ids come from a
    /// monotonic generator, so this signals a bug in the caller.
    pub fn insert(&mut self, request: PendingRequest) -> Result<(), PendingRequest> {
        if self.entries.contains_key(&request.id) {
            return Err(request);
        }
        self.entries.insert(request.id, request);
        Ok(())
    }

    /// Removes and returns the request with the given id.
    pub fn take(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Rejects every pending request with the error built by `make_err`
    /// and clears the map. Returns how many requests were rejected.
    pub fn reject_all(&mut self, make_err: impl Fn() -> ClientError) -> usize {
        let count = self.entries.len();
        for (_, request) in self.entries.drain() {
            let id = request.id;
            if !request.settle(Err(make_err())) {
                tracing::trace!(%id, "caller gone before rejection");
            }
        }
        count
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: u64) -> (PendingRequest, oneshot::Receiver<RequestOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingRequest::new(RequestId::from(id), "machine.list".to_string(), tx),
            rx,
        )
    }

    #[test]
    fn insert_and_take() {
        let mut pending = PendingRequests::new();
        let (req, _rx) = entry(1);
        assert!(pending.insert(req).is_ok());
        assert_eq!(pending.len(), 1);

        let Some(taken) = pending.take(RequestId::from(1)) else {
            panic!("expected pending entry");
        };
        assert_eq!(taken.method, "machine.list");
        assert!(pending.is_empty());
    }

    #[test]
    fn duplicate_id_is_refused() {
        let mut pending = PendingRequests::new();
        let (a, _rx_a) = entry(5);
        let (b, _rx_b) = entry(5);
        assert!(pending.insert(a).is_ok());
        assert!(pending.insert(b).is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn take_unknown_is_none() {
        let mut pending = PendingRequests::new();
        assert!(pending.take(RequestId::from(99)).is_none());
    }

    #[tokio::test]
    async fn settle_delivers_outcome() {
        let (req, rx) = entry(3);
        assert!(req.settle(Ok(json!([1, 2]))));
        let Ok(Ok(value)) = rx.await else {
            panic!("expected resolved outcome");
        };
        assert_eq!(value, json!([1, 2]));
    }

    #[test]
    fn settle_reports_abandoned_caller() {
        let (req, rx) = entry(3);
        drop(rx);
        assert!(!req.settle(Ok(Value::Null)));
    }

    #[tokio::test]
    async fn reject_all_clears_and_notifies() {
        let mut pending = PendingRequests::new();
        let mut receivers = Vec::new();
        for id in 1..=3 {
            let (req, rx) = entry(id);
            assert!(pending.insert(req).is_ok());
            receivers.push(rx);
        }
        // An abandoned caller must not stop the others from being rejected.
        drop(receivers.remove(0));

        assert_eq!(pending.reject_all(|| ClientError::ConnectionClosed), 3);
        assert!(pending.is_empty());
        for rx in receivers {
            assert!(matches!(rx.await, Ok(Err(ClientError::ConnectionClosed))));
        }
    }
}

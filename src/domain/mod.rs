//! Domain layer: identifiers, the pending map, and lifecycle events.
//!
//! Everything here is transport-agnostic. The websocket layer in
//! [`crate::ws`] drives these types from its connection task.

pub mod client_id;
pub mod connection_event;
pub mod connection_state;
pub mod event_bus;
pub mod notify_event;
pub mod pending;
pub mod request_id;

pub use client_id::ClientId;
pub use connection_event::{CloseReason, ConnectionEvent};
pub use connection_state::ConnectionState;
pub use event_bus::EventBus;
pub use notify_event::NotifyEvent;
pub use pending::{PendingRequest, PendingRequests, RequestOutcome};
pub use request_id::{RequestId, RequestIdGenerator};

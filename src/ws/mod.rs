//! WebSocket layer: wire frames, dispatch, subscriptions, and the
//! connection task that owns the socket.

pub(crate) mod connection;
pub mod dispatcher;
pub mod messages;
pub mod subscription;

pub use dispatcher::{Dispatched, Dispatcher};
pub use messages::{FrameType, InboundFrame, RequestFrame};
pub use subscription::{SubscriberId, SubscriptionRegistry, WILDCARD};

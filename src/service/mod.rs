//! Service layer: the public client handle.
//!
//! [`WsClient`] is what the UI state layer holds. It turns `send()` and
//! `subscribe()` calls into commands for the connection task in
//! [`crate::ws`] and hands results back through one-shot channels.

pub mod ws_client;

pub use ws_client::{HandlerHandle, Subscription, WsClient};

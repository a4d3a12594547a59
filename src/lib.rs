//! # maas-ws-client
//!
//! Request/response correlating WebSocket client for the MAAS admin API.
//!
//! The MAAS UI talks to its region controller over one persistent
//! websocket. Every call carries a correlation id that the server echoes
//! in its response; unsolicited `notify` frames push model changes
//! (`machine.updated`, `zone.deleted`, ...) to whoever subscribed.
//!
//! ## Architecture
//!
//! ```text
//! UI state layer
//!     │   send() / call() / subscribe() / on()
//!     ├── WsClient (service/)
//!     │       │ command channel
//!     ├── ConnectionTask (ws/connection)
//!     │       ├── Dispatcher (ws/dispatcher)
//!     │       │     ├── PendingRequests (domain/)
//!     │       │     └── SubscriptionRegistry (ws/subscription)
//!     │       └── EventBus (domain/) ── lifecycle events
//!     │
//!     └── MAAS websocket endpoint
//! ```
//!
//! ## Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), maas_ws_client::ClientError> {
//! use maas_ws_client::{ClientConfig, WsClient};
//!
//! let client = WsClient::new(ClientConfig::for_url("ws://localhost:5240/MAAS/ws")?);
//! client.connect().await?;
//!
//! let mut updates = client.subscribe("machine.updated");
//! let machines = client.send("machine.list", serde_json::json!({})).await?;
//! println!("{machines}");
//! if let Some(update) = updates.recv().await {
//!     println!("{}: {}", update.event, update.payload);
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;

pub use config::{ClientConfig, ReconnectPolicy};
pub use domain::{ConnectionEvent, ConnectionState, NotifyEvent, RequestId};
pub use error::{ClientError, RemoteErrorBody};
pub use service::{HandlerHandle, Subscription, WsClient};

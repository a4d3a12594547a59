//! Lifecycle events published on the [`super::EventBus`].

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why an open connection went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// `close()` was called on the client.
    Requested,
    /// The server sent a close frame or the stream ended.
    RemoteClosed,
    /// Reading or writing the socket failed.
    TransportError(String),
}

/// Connection lifecycle notification.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A handshake has started.
    Connecting {
        /// Endpoint being dialled.
        url: String,
        /// 0 for an explicit `connect()`, 1.. for reconnect attempts.
        attempt: u32,
        /// When the handshake started.
        timestamp: DateTime<Utc>,
    },

    /// The socket is open.
    Opened {
        /// Endpoint that accepted the handshake.
        url: String,
        /// Number of queued sends flushed on open.
        flushed: usize,
        /// When the socket opened.
        timestamp: DateTime<Utc>,
    },

    /// The handshake failed; the client is closed again.
    HandshakeFailed {
        /// Failure description.
        message: String,
        /// Queued sends rejected because of the failure.
        rejected: usize,
        /// When the failure was observed.
        timestamp: DateTime<Utc>,
    },

    /// An open socket was closed or lost.
    Closed {
        /// Why the socket went away.
        reason: CloseReason,
        /// Pending requests rejected with `ConnectionClosed`.
        rejected: usize,
        /// When the close was observed.
        timestamp: DateTime<Utc>,
    },

    /// A reconnect attempt has been scheduled.
    ReconnectScheduled {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt in milliseconds.
        delay_ms: u64,
        /// When the attempt was scheduled.
        timestamp: DateTime<Utc>,
    },

    /// The reconnect policy ran out of attempts.
    ReconnectAbandoned {
        /// Attempts made.
        attempts: u32,
        /// When the client gave up.
        timestamp: DateTime<Utc>,
    },
}

impl ConnectionEvent {
    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Opened { .. } => "opened",
            Self::HandshakeFailed { .. } => "handshake_failed",
            Self::Closed { .. } => "closed",
            Self::ReconnectScheduled { .. } => "reconnect_scheduled",
            Self::ReconnectAbandoned { .. } => "reconnect_abandoned",
        }
    }
}

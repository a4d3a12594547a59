//! Connection lifecycle states.

use std::fmt;

use serde::Serialize;

/// State of the client's single socket.
///
/// `Closed --connect()--> Connecting --(open)--> Open --(close/error)--> Closed`.
/// A failed handshake goes straight from `Connecting` back to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket. Sends are rejected.
    #[default]
    Closed,
    /// Handshake in progress. Sends are queued.
    Connecting,
    /// Socket open. Sends are written immediately.
    Open,
}

impl ConnectionState {
    /// Returns the state as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

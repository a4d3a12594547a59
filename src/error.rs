//! Client error types.
//!
//! [`ClientError`] is the central error type for the client. Connection-level
//! failures are broadcast to every pending caller; per-request failures
//! ([`ClientError::Remote`], [`ClientError::Timeout`]) reach only the caller
//! that issued the request.

use serde::Serialize;
use serde_json::Value;

use crate::domain::RequestId;

/// Error payload carried by a failed RESPONSE frame, normalized.
///
/// The backend sends either a bare string or an object such as
/// ```json
/// { "code": 404, "message": "no such machine" }
/// ```
/// Anything else is kept verbatim and rendered as its JSON text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteErrorBody {
    /// Server-supplied numeric code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human-readable error message.
    pub message: String,
    /// The raw `error` value as received.
    pub payload: Value,
}

impl RemoteErrorBody {
    /// Normalizes a raw `error` value from a RESPONSE frame.
    #[must_use]
    pub fn from_payload(payload: Value) -> Self {
        let (code, message) = match &payload {
            Value::String(s) => (None, s.clone()),
            Value::Object(map) => {
                let code = map.get("code").and_then(Value::as_i64);
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| payload.to_string(), str::to_string);
                (code, message)
            }
            other => (None, other.to_string()),
        };
        Self {
            code,
            message,
            payload,
        }
    }
}

/// Client error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category    |
/// |-----------|-------------|
/// | 1000–1999 | Connection  |
/// | 2000–2999 | Request     |
/// | 3000–3999 | Protocol    |
/// | 4000–4999 | Local       |
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The socket could not be established (handshake failure or timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection was closed or lost while the request was in flight,
    /// or the client was not connected.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server answered this request with an error payload.
    #[error("remote error: {}", .0.message)]
    Remote(RemoteErrorBody),

    /// A RESPONSE frame named an id with no pending request.
    #[error("stale response for request {0}")]
    StaleResponse(RequestId),

    /// No response arrived within the configured request timeout.
    #[error("request {id} timed out after {after_ms} ms")]
    Timeout {
        /// Correlation id of the request that timed out.
        id: RequestId,
        /// Elapsed time in milliseconds.
        after_ms: u64,
    },

    /// An inbound frame could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request params or a typed result failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Connection(_) => 1001,
            Self::ConnectionClosed => 1002,
            Self::Remote(_) => 2001,
            Self::Timeout { .. } => 2002,
            Self::StaleResponse(_) => 3001,
            Self::Protocol(_) => 3002,
            Self::Serialization(_) => 4001,
            Self::Config(_) => 4002,
        }
    }

    /// Returns `true` for failures that are broadcast to every pending
    /// caller rather than delivered to a single request.
    #[must_use]
    pub const fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionClosed)
    }

    /// Returns the server error body if this is a [`ClientError::Remote`].
    #[must_use]
    pub const fn remote(&self) -> Option<&RemoteErrorBody> {
        match self {
            Self::Remote(body) => Some(body),
            _ => None,
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid endpoint url: {err}"))
    }
}

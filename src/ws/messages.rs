//! WebSocket wire frames: outgoing requests, inbound responses and notifies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::RequestId;
use crate::error::ClientError;

/// Discriminator carried in the `type` field of every frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Client → Server call.
    Request,
    /// Server → Client answer to a request.
    Response,
    /// Server → Client push message.
    Notify,
}

/// Outgoing request frame.
///
/// ```json
/// { "id": 1, "type": "request", "method": "machine.list", "params": {} }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct RequestFrame {
    /// Correlation id echoed back in the response.
    pub id: RequestId,
    /// Always [`FrameType::Request`].
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Handler name, e.g. `"machine.list"`.
    pub method: String,
    /// Method parameters.
    pub params: Value,
}

impl RequestFrame {
    /// Builds a request frame.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            frame_type: FrameType::Request,
            method: method.into(),
            params,
        }
    }

    /// Serializes the frame to its JSON text form.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Serialization`] if the params cannot be encoded.
    pub fn to_text(&self) -> Result<String, ClientError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound frame, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Answer to a request.
    Response {
        /// Echoed correlation id.
        id: RequestId,
        /// Result on success. Missing means `null`.
        #[serde(default)]
        result: Value,
        /// Error payload on failure.
        #[serde(default)]
        error: Option<Value>,
    },
    /// Server-initiated push message.
    Notify {
        /// Event name, e.g. `"machine.updated"`.
        event: String,
        /// Event payload.
        #[serde(default)]
        payload: Value,
    },
}

impl InboundFrame {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] for invalid JSON, a missing or
    /// unknown `type`, or missing required fields.
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        serde_json::from_str(text).map_err(|e| ClientError::Protocol(e.to_string()))
    }

    /// Returns the frame type.
    #[must_use]
    pub const fn frame_type(&self) -> FrameType {
        match self {
            Self::Response { .. } => FrameType::Response,
            Self::Notify { .. } => FrameType::Notify,
        }
    }
}

//! Event Panel Wire Format
//!
//! UTF-8 JSON text frames exchanged with the event server.
//!
//! - Outbound: `{"message": "..."}` plus `"correlation_id"` when tagged
//!   correlation is enabled
//! - Inbound event: `{"message": "...", "timestamp": "<ISO-8601>"}`, optionally
//!   echoing `"correlation_id"`
//! - Inbound failure: `{"error": "..."}`

use serde::{Deserialize, Serialize};

use crate::clock::{parse_timestamp_ms, Millis};
use crate::error::PanelError;

/// Frame sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl OutboundFrame {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn tagged(message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            correlation_id: Some(correlation_id.into()),
        }
    }

    pub fn to_json(&self) -> Result<String, PanelError> {
        serde_json::to_string(self).map_err(|e| PanelError::Malformed(e.to_string()))
    }
}

/// Event message as delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub message: String,
    pub timestamp: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl InboundMessage {
    /// Source timestamp in ms, if the server's timestamp parses.
    pub fn source_time_ms(&self) -> Option<Millis> {
        parse_timestamp_ms(&self.timestamp)
    }
}

#[derive(Debug, Deserialize)]
struct ServerErrorMsg {
    error: String,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Event(InboundMessage),
    ServerError(String),
}

/// Decode one inbound text frame.
///
/// An `error` field wins over everything else, mirroring how the server
/// reports rejected input. Anything that is neither an error nor a complete
/// event is malformed.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, PanelError> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| PanelError::Malformed(e.to_string()))?;

    if json.get("error").is_some() {
        let msg: ServerErrorMsg =
            serde_json::from_value(json).map_err(|e| PanelError::Malformed(e.to_string()))?;
        return Ok(InboundFrame::ServerError(msg.error));
    }

    serde_json::from_value::<InboundMessage>(json)
        .map(InboundFrame::Event)
        .map_err(|e| PanelError::Malformed(e.to_string()))
}

//! Wire format for session frames.
//!
//! Every frame is a single JSON object with a `type` discriminator.
//!
//! Inbound (client → server):
//!
//! ```text
//! {"type": "message" | "clear_history" | "export_chat", "content"?: string, "format"?: string}
//! ```
//!
//! Outbound (server → client):
//!
//! ```text
//! {"type": "message", "sender": "therapist", "content": string, "timestamp": number}
//! {"type": "system", "content": string}
//! {"type": "export", "format": string, "content": string}
//! {"type": "error", "content": string}
//! ```
//!
//! Decoding is strict about shape (the payload must be an object and the
//! optional string fields must be strings) but lenient about the `type`
//! value: an unknown or missing type decodes to [`Inbound::Unknown`] so the
//! protocol can ignore it instead of reporting an error.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content of the error frame sent for any frame that fails to decode.
pub const INVALID_FORMAT: &str = "Invalid message format";

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Therapist,
}

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// User utterance. Missing or null content decodes as an empty string.
    Message { content: String },

    /// Reset the conversation history.
    ClearHistory,

    /// Export the transcript. The format is kept as sent so that an
    /// unsupported value can be ignored by the dispatcher.
    ExportChat { format: String },

    /// Well-formed frame with a missing, non-string or unrecognized type.
    Unknown { kind: Option<String> },
}

/// Format requested when an `export_chat` frame carries none, or `null`.
pub const DEFAULT_EXPORT_FORMAT: &str = "text";

/// A frame sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Conversation message from the assistant.
    Message {
        sender: Sender,
        content: String,
        /// Seconds since the Unix epoch.
        timestamp: f64,
    },

    /// Acknowledgement of a session-control operation.
    System { content: String },

    /// Rendered transcript.
    Export { format: String, content: String },

    /// Failure while handling the last frame. The session stays open.
    Error { content: String },
}

impl Outbound {
    /// Assistant message stamped with the current time.
    pub fn therapist(content: impl Into<String>) -> Self {
        Outbound::Message {
            sender: Sender::Therapist,
            content: content.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Outbound::System {
            content: content.into(),
        }
    }

    pub fn export(format: impl Into<String>, content: impl Into<String>) -> Self {
        Outbound::Export {
            format: format.into(),
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Outbound::Error {
            content: content.into(),
        }
    }

    /// The wire name of this frame's type.
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Message { .. } => "message",
            Outbound::System { .. } => "system",
            Outbound::Export { .. } => "export",
            Outbound::Error { .. } => "error",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Outbound::Message { content, .. }
            | Outbound::System { content }
            | Outbound::Export { content, .. }
            | Outbound::Error { content } => content,
        }
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame must be a JSON object")]
    NotAnObject,

    #[error("frame is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
}

#[derive(Error, Debug)]
#[error("failed to encode frame: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Shape of an inbound object. Unknown fields (the web client also sends
/// `sender`) are ignored.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<serde_json::Value>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

/// Decode a text frame.
pub fn decode(raw: &str) -> Result<Inbound, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let frame: RawFrame = serde_json::from_value(value)?;

    let kind = match frame.kind {
        Some(serde_json::Value::String(kind)) => kind,
        _ => return Ok(Inbound::Unknown { kind: None }),
    };

    let inbound = match kind.as_str() {
        "message" => Inbound::Message {
            content: frame.content.unwrap_or_default(),
        },
        "clear_history" => Inbound::ClearHistory,
        // A null format counts as missing and falls back to text
        "export_chat" => Inbound::ExportChat {
            format: frame
                .format
                .unwrap_or_else(|| DEFAULT_EXPORT_FORMAT.to_string()),
        },
        _ => Inbound::Unknown { kind: Some(kind) },
    };
    Ok(inbound)
}

/// Decode a binary frame, which must hold UTF-8 JSON.
pub fn decode_bytes(raw: &[u8]) -> Result<Inbound, DecodeError> {
    decode(std::str::from_utf8(raw)?)
}

/// Encode an outbound frame as compact JSON.
pub fn encode(frame: &Outbound) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(frame)?)
}

/// Current time as floating point seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

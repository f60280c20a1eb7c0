//! Wire envelope codec.
//!
//! One JSON object per wire message, multiplexing text deltas, base64
//! PCM16 audio, tool events, and turn-control flags over a single logical
//! channel. Encoding and decoding are pure functions with no side
//! effects; a decode failure costs that one message and must never tear
//! down the session.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_AUDIO_PCM: &str = "audio/pcm";
pub const MIME_JSON: &str = "application/json";
const MESSAGE_TYPE_TOOL_EVENT: &str = "tool_event";

/// A decoded wire message.
///
/// Exactly one variant is meaningful per message; the control variants
/// carry no payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// One streamed text delta of the current agent turn.
    Text(String),
    /// Raw little-endian PCM16 samples. Always an even number of bytes.
    Audio(Bytes),
    /// Tool side-effect payload, forwarded verbatim to the host.
    ToolEvent(Value),
    /// The agent finished its turn.
    TurnComplete,
    /// The agent was cut off mid-turn; content may resume under the same
    /// turn.
    Interrupted,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EnvelopeDecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing or malformed data field for {0}")]
    MissingData(String),
    #[error("invalid base64 audio payload: {0}")]
    InvalidBase64(String),
    #[error("audio payload of {0} bytes is not a whole number of 16-bit samples")]
    OddSampleBoundary(usize),
    #[error("unsupported mime type: {0:?}")]
    UnsupportedMime(Option<String>),
}

/// Serde view of the wire schema. Fields the sender leaves out arrive as
/// `None`; the server also sends explicit `null`s on control messages.
#[derive(Deserialize)]
struct WireMessage {
    mime_type: Option<String>,
    data: Option<Value>,
    turn_complete: Option<bool>,
    interrupted: Option<bool>,
    message_type: Option<String>,
}

/// Serialize an envelope to one wire message.
pub fn encode(envelope: &Envelope) -> String {
    let value = match envelope {
        Envelope::Text(text) => json!({
            "mime_type": MIME_TEXT,
            "data": text,
        }),
        Envelope::Audio(pcm) => json!({
            "mime_type": MIME_AUDIO_PCM,
            "data": BASE64.encode(pcm),
        }),
        Envelope::ToolEvent(payload) => json!({
            "mime_type": MIME_JSON,
            "message_type": MESSAGE_TYPE_TOOL_EVENT,
            "data": payload,
        }),
        Envelope::TurnComplete => json!({ "turn_complete": true }),
        Envelope::Interrupted => json!({ "interrupted": true }),
    };
    value.to_string()
}

/// Parse one wire message into an envelope.
///
/// `turn_complete` wins over `interrupted` when a control message carries
/// both flags, matching the order the upstream protocol checks them in.
pub fn decode(raw: &str) -> Result<Envelope, EnvelopeDecodeError> {
    let wire: WireMessage = serde_json::from_str(raw)
        .map_err(|e| EnvelopeDecodeError::InvalidJson(e.to_string()))?;

    if wire.turn_complete == Some(true) {
        return Ok(Envelope::TurnComplete);
    }
    if wire.interrupted == Some(true) {
        return Ok(Envelope::Interrupted);
    }

    match wire.mime_type.as_deref() {
        Some(MIME_TEXT) => match wire.data {
            Some(Value::String(text)) => Ok(Envelope::Text(text)),
            _ => Err(EnvelopeDecodeError::MissingData(MIME_TEXT.to_string())),
        },
        Some(MIME_AUDIO_PCM) => {
            let encoded = match wire.data {
                Some(Value::String(s)) => s,
                _ => return Err(EnvelopeDecodeError::MissingData(MIME_AUDIO_PCM.to_string())),
            };
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| EnvelopeDecodeError::InvalidBase64(e.to_string()))?;
            if bytes.len() % 2 != 0 {
                return Err(EnvelopeDecodeError::OddSampleBoundary(bytes.len()));
            }
            Ok(Envelope::Audio(Bytes::from(bytes)))
        }
        Some(MIME_JSON) if wire.message_type.as_deref() == Some(MESSAGE_TYPE_TOOL_EVENT) => {
            match wire.data {
                Some(payload) => Ok(Envelope::ToolEvent(payload)),
                None => Err(EnvelopeDecodeError::MissingData(MIME_JSON.to_string())),
            }
        }
        other => Err(EnvelopeDecodeError::UnsupportedMime(
            other.map(str::to_string),
        )),
    }
}

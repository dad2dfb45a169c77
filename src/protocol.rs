//! Wire protocol for the streaming channel
//!
//! Text frames carry JSON objects tagged by `type`. Outbound audio is the
//! only binary frame: raw little-endian 16-bit PCM, mono, 16kHz.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::transport::Frame;
use crate::voice::pcm;

/// Messages the client sends as text frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A sampled camera frame, base64 JPEG
    Video { data: String },
    /// A typed user message
    Text { content: String },
}

impl OutboundMessage {
    /// Serialize into a text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::Text(serde_json::to_string(self)?))
    }
}

/// Messages the service sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Synthesized speech, 16-bit PCM at 24kHz as hex or base64 text
    Audio { data: String },
    /// The assistant ran a tool
    ToolExecuted {
        tool: String,
        #[serde(default)]
        result: serde_json::Value,
    },
    /// Informational status line
    Status { message: String },
    /// Error reported by the service; the session stays up
    Error { message: String },
    /// Continuous monitoring started
    MonitoringEnabled {
        #[serde(default)]
        context: Option<String>,
    },
    /// Continuous monitoring stopped
    MonitoringDisabled,
    /// The monitored item was spotted; monitoring ends with it
    ItemFound {
        #[serde(default)]
        item: Option<String>,
    },
}

impl InboundMessage {
    /// Parse a text frame payload
    ///
    /// # Errors
    ///
    /// Returns error if the text is not JSON or names an unknown type
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One-line human summary of a tool result
///
/// Uses the result's `message` field when it has one.
#[must_use]
pub fn tool_summary(tool: &str, result: &serde_json::Value) -> String {
    match result.get("message").and_then(serde_json::Value::as_str) {
        Some(message) => format!("{tool}: {message}"),
        None => format!("Ran {tool}"),
    }
}

/// Build the text frame for an encoded JPEG snapshot
///
/// # Errors
///
/// Returns error if serialization fails
pub fn video_frame(jpeg: &[u8]) -> Result<Frame> {
    OutboundMessage::Video {
        data: STANDARD.encode(jpeg),
    }
    .to_frame()
}

/// Build the binary frame for a block of microphone samples
#[must_use]
pub fn audio_frame(block: &[f32]) -> Frame {
    Frame::Binary(pcm::encode_block(block))
}

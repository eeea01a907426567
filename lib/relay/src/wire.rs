//! Upstream wire protocol.
//!
//! Every frame is a JSON object discriminated by a `type` field. Inbound
//! frames are parsed into [`InboundMessage`]; frames of an unknown type are
//! reported as [`WireError::Unknown`] so the caller can log and drop them.

use crate::error::WireError;
use callrelay_core::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A frame received from the upstream voice agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Handshake metadata, sent once after `initiate`.
    SessionMetadata {
        conversation_id: String,
        #[serde(default)]
        audio_format: Option<String>,
    },
    /// Application-level liveness probe; must be answered with `pong`.
    Ping { event_id: u64 },
    /// Base64-encoded agent audio.
    AudioChunk { audio_base64: String },
    PartialTranscript { text: String },
    FinalTranscript { text: String },
    AgentUtterance { text: String },
    /// The agent asks for a tool to be executed on our side.
    ToolCallRequest {
        correlation_id: CorrelationId,
        tool_name: String,
        #[serde(default)]
        arguments: JsonValue,
    },
    /// The upstream session finished normally.
    SessionEnded {
        reason: String,
        #[serde(default)]
        duration_ms: u64,
    },
    #[serde(other)]
    Unknown,
}

/// A frame sent to the upstream voice agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Starts the session; sent after every successful handshake.
    Initiate {
        agent_config: JsonValue,
        dynamic_variables: BTreeMap<String, String>,
    },
    AudioChunk { audio_base64: String },
    /// Text injected as if the caller said it.
    UserMessage { text: String },
    /// Background context for the agent; not spoken.
    ContextualUpdate { text: String },
    ToolResult {
        correlation_id: CorrelationId,
        payload: JsonValue,
        is_error: bool,
    },
    Pong { event_id: u64 },
}

impl OutboundMessage {
    /// Returns the wire `type` of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initiate { .. } => "initiate",
            Self::AudioChunk { .. } => "audio_chunk",
            Self::UserMessage { .. } => "user_message",
            Self::ContextualUpdate { .. } => "contextual_update",
            Self::ToolResult { .. } => "tool_result",
            Self::Pong { .. } => "pong",
        }
    }

    /// Encodes the message as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload cannot be serialized.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parses an inbound text frame.
///
/// # Errors
///
/// Returns [`WireError::Malformed`] for invalid JSON, a missing `type`, or
/// missing fields, and [`WireError::Unknown`] for an unrecognized `type`.
pub fn parse_inbound(frame: &str) -> Result<InboundMessage, WireError> {
    let value: JsonValue = serde_json::from_str(frame).map_err(|e| WireError::Malformed {
        reason: e.to_string(),
    })?;

    let message_type = value
        .get("type")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| WireError::Malformed {
            reason: "missing 'type' field".to_string(),
        })?
        .to_string();

    match serde_json::from_value(value) {
        Ok(InboundMessage::Unknown) => Err(WireError::Unknown { message_type }),
        Ok(message) => Ok(message),
        Err(e) => Err(WireError::Malformed {
            reason: format!("{message_type}: {e}"),
        }),
    }
}

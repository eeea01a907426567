//! Domain events and transport notices.

use crate::wire::InboundMessage;
use callrelay_core::{ConnectionState, ConversationId, CorrelationId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A normalized event observed on a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    HandshakeMetadata {
        upstream_conversation_id: String,
    },
    AudioChunk {
        audio_base64: String,
    },
    PartialTranscript {
        text: String,
    },
    FinalTranscript {
        text: String,
    },
    AgentUtterance {
        text: String,
    },
    ToolCallRequest {
        correlation_id: CorrelationId,
        tool_name: String,
        arguments: JsonValue,
    },
    LivenessProbe {
        event_id: u64,
    },
    SessionEnded {
        reason: String,
        duration_ms: u64,
    },
    TransportError {
        message: String,
    },
}

impl DomainEvent {
    /// Returns the event type name used in dashboard frames.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HandshakeMetadata { .. } => "handshake_metadata",
            Self::AudioChunk { .. } => "audio_chunk",
            Self::PartialTranscript { .. } => "partial_transcript",
            Self::FinalTranscript { .. } => "final_transcript",
            Self::AgentUtterance { .. } => "agent_utterance",
            Self::ToolCallRequest { .. } => "tool_call_request",
            Self::LivenessProbe { .. } => "liveness_probe",
            Self::SessionEnded { .. } => "session_ended",
            Self::TransportError { .. } => "transport_error",
        }
    }

    /// Returns the event's fields without the `type` tag.
    #[must_use]
    pub fn payload(&self) -> JsonValue {
        let mut value = serde_json::to_value(self).unwrap_or(JsonValue::Null);
        if let Some(fields) = value.as_object_mut() {
            fields.remove("type");
        }
        value
    }

    /// Translates an upstream message, or `None` for unknown types.
    #[must_use]
    pub fn from_inbound(message: InboundMessage) -> Option<Self> {
        let event = match message {
            InboundMessage::SessionMetadata {
                conversation_id, ..
            } => Self::HandshakeMetadata {
                upstream_conversation_id: conversation_id,
            },
            InboundMessage::Ping { event_id } => Self::LivenessProbe { event_id },
            InboundMessage::AudioChunk { audio_base64 } => Self::AudioChunk { audio_base64 },
            InboundMessage::PartialTranscript { text } => Self::PartialTranscript { text },
            InboundMessage::FinalTranscript { text } => Self::FinalTranscript { text },
            InboundMessage::AgentUtterance { text } => Self::AgentUtterance { text },
            InboundMessage::ToolCallRequest {
                correlation_id,
                tool_name,
                arguments,
            } => Self::ToolCallRequest {
                correlation_id,
                tool_name,
                arguments,
            },
            InboundMessage::SessionEnded {
                reason,
                duration_ms,
            } => Self::SessionEnded {
                reason,
                duration_ms,
            },
            InboundMessage::Unknown => return None,
        };
        Some(event)
    }
}

/// Why a transport stopped for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The upstream ended the session.
    Ended { reason: String },
    /// The owner closed the transport.
    Closed { reason: String },
    /// Reconnection was exhausted.
    Failed { attempts: u32, last_error: String },
}

impl Termination {
    /// Returns the reason reported to dashboards.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Ended { reason } | Self::Closed { reason } => reason,
            Self::Failed { .. } => "failed",
        }
    }

    /// Returns the terminal state this termination leaves the transport in.
    #[must_use]
    pub fn final_state(&self) -> ConnectionState {
        match self {
            Self::Ended { .. } | Self::Closed { .. } => ConnectionState::Ended,
            Self::Failed { .. } => ConnectionState::Failed,
        }
    }
}

/// Identifies one transport instance, so notices from a replaced
/// transport can be told apart from its successor's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u64);

/// What a transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportNotice {
    StateChanged(ConnectionState),
    Event(DomainEvent),
    /// Sent exactly once, last.
    Terminated(Termination),
}

/// A notice tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportUpdate {
    pub conversation_id: ConversationId,
    pub transport_id: TransportId,
    pub notice: TransportNotice,
}

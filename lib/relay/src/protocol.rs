//! Dashboard wire protocol.
//!
//! Dashboards speak JSON text frames tagged by `type`. Commands flow in,
//! events flow out.

use crate::error::RelayError;
use crate::event::DomainEvent;
use callrelay_core::{ConnectionState, ConversationId, CorrelationId, DashboardSessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A command sent by a dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardCommand {
    Subscribe {
        conversation_id: ConversationId,
    },
    Unsubscribe {
        conversation_id: ConversationId,
    },
    /// Speak as the caller.
    SendMessage {
        conversation_id: ConversationId,
        text: String,
    },
    /// Give the agent background context.
    InjectContext {
        conversation_id: ConversationId,
        text: String,
    },
    /// Answer a pending tool call.
    SubmitToolResult {
        conversation_id: ConversationId,
        correlation_id: CorrelationId,
        payload: JsonValue,
        #[serde(default)]
        is_error: bool,
    },
}

impl DashboardCommand {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidCommand`] if the frame is not a command.
    pub fn parse(frame: &str) -> Result<Self, RelayError> {
        serde_json::from_str(frame).map_err(|e| RelayError::InvalidCommand {
            reason: e.to_string(),
        })
    }

    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::Subscribe { conversation_id }
            | Self::Unsubscribe { conversation_id }
            | Self::SendMessage {
                conversation_id, ..
            }
            | Self::InjectContext {
                conversation_id, ..
            }
            | Self::SubmitToolResult {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// An event pushed to a dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    ConversationOpened {
        conversation_id: ConversationId,
        state: ConnectionState,
    },
    ConversationEvent {
        conversation_id: ConversationId,
        event_type: String,
        payload: JsonValue,
    },
    ConversationClosed {
        conversation_id: ConversationId,
        reason: String,
    },
    SubscriptionAck {
        conversation_id: ConversationId,
        subscribed: bool,
        /// Current state, if the conversation is live.
        state: Option<ConnectionState>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl DashboardEvent {
    #[must_use]
    pub fn from_domain(conversation_id: ConversationId, event: &DomainEvent) -> Self {
        Self::ConversationEvent {
            conversation_id,
            event_type: event.kind().to_string(),
            payload: event.payload(),
        }
    }

    #[must_use]
    pub fn from_error(error: &RelayError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    /// Encodes the event as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload cannot be serialized.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One dashboard's interest in one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSubscription {
    pub session_id: DashboardSessionId,
    pub conversation_id: ConversationId,
    pub subscribed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_submit_tool_result() {
        let frame = json!({
            "type": "submit_tool_result",
            "conversation_id": "conv1",
            "correlation_id": "evt1",
            "payload": {"in_stock": true}
        })
        .to_string();

        let command = DashboardCommand::parse(&frame).unwrap();
        assert_eq!(command.conversation_id().as_str(), "conv1");
        assert!(matches!(
            command,
            DashboardCommand::SubmitToolResult { is_error: false, .. }
        ));
    }

    #[test]
    fn rejects_unknown_commands() {
        let err = DashboardCommand::parse(r#"{"type":"hangup","conversation_id":"c"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_command");

        let err = DashboardCommand::parse(r#"{"type":"subscribe","conversation_id":""}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_command");
    }

    #[test]
    fn domain_events_become_conversation_events() {
        let event = DashboardEvent::from_domain(
            ConversationId::new("conv1").unwrap(),
            &DomainEvent::FinalTranscript {
                text: "I need to return boots".to_string(),
            },
        );

        let value: JsonValue = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation_event",
                "conversation_id": "conv1",
                "event_type": "final_transcript",
                "payload": {"text": "I need to return boots"}
            })
        );
    }

    #[test]
    fn errors_carry_codes() {
        let event = DashboardEvent::from_error(&RelayError::HubUnavailable);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "hub_unavailable");
    }
}

//! Conversation session snapshots.
//!
//! A `ConversationSession` is the persisted view of one live or recently
//! ended conversation. The relay mutates it on every domain event and the
//! state store keeps it around for a while after the call ends so that a
//! reconnecting dashboard can recover what happened.

use crate::id::{ConversationId, CustomerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage of the upstream connection for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection has been attempted yet.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The handshake succeeded and traffic is flowing.
    Connected,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// The connection broke; a reconnect is about to be scheduled.
    Errored,
    /// The conversation finished gracefully.
    Ended,
    /// The reconnect budget was exhausted.
    Failed,
}

impl ConnectionState {
    /// Returns true once no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    /// Returns the snake_case name used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Errored => "errored",
            Self::Ended => "ended",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The most recent event seen on a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastEvent {
    /// Event kind, e.g. `agent_utterance`.
    pub kind: String,
    /// When the relay observed it.
    pub at: DateTime<Utc>,
}

/// Snapshot of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Local conversation identifier.
    pub conversation_id: ConversationId,
    /// Customer or lead the conversation belongs to, if known.
    pub owner: Option<CustomerId>,
    /// Identifier assigned by the upstream service during the handshake.
    pub upstream_conversation_id: Option<String>,
    /// Current connection state.
    pub state: ConnectionState,
    /// When the relay opened the conversation.
    pub started_at: DateTime<Utc>,
    /// When the conversation reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the conversation ended.
    pub end_reason: Option<String>,
    /// The last event observed.
    pub last_event: Option<LastEvent>,
}

impl ConversationSession {
    /// Creates a snapshot for a conversation that is being opened now.
    #[must_use]
    pub fn new(conversation_id: ConversationId, owner: Option<CustomerId>) -> Self {
        Self {
            conversation_id,
            owner,
            upstream_conversation_id: None,
            state: ConnectionState::Disconnected,
            started_at: Utc::now(),
            ended_at: None,
            end_reason: None,
            last_event: None,
        }
    }

    /// Records an observed event.
    pub fn record_event(&mut self, kind: impl Into<String>) {
        self.last_event = Some(LastEvent {
            kind: kind.into(),
            at: Utc::now(),
        });
    }

    /// Marks the conversation finished.
    pub fn finish(&mut self, state: ConnectionState, reason: impl Into<String>) {
        self.state = state;
        self.ended_at = Some(Utc::now());
        self.end_reason = Some(reason.into());
    }

    /// Returns true if the conversation has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> ConversationSession {
        ConversationSession::new(ConversationId::new("conv1").unwrap(), None)
    }

    #[test]
    fn new_session_starts_disconnected() {
        let session = conversation();
        assert_eq!(session.state, ConnectionState::Disconnected);
        assert!(!session.is_finished());
        assert!(session.last_event.is_none());
    }

    #[test]
    fn finish_sets_end_fields() {
        let mut session = conversation();
        session.finish(ConnectionState::Failed, "failed");

        assert!(session.is_finished());
        assert_eq!(session.state, ConnectionState::Failed);
        assert_eq!(session.end_reason.as_deref(), Some("failed"));
    }

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Ended.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Reconnecting.is_terminal());
        assert!(!ConnectionState::Errored.is_terminal());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[test]
    fn snapshot_survives_json() {
        let mut session = conversation();
        session.record_event("agent_utterance");

        let json = serde_json::to_string(&session).unwrap();
        let parsed: ConversationSession = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, session);
    }
}

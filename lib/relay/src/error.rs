//! Error types for the relay crate.
//!
//! - `WireError`: an upstream frame that cannot become a domain event
//! - `ConnectError`: a connection attempt that did not reach `connected`
//! - `TransportError`: a command the transport could not accept
//! - `ToolError` / `ToolCallError`: local tool execution and correlation
//! - `RelayError`: hub operations, each with a stable dashboard error code

use callrelay_core::{ConnectionState, ConversationId, CorrelationId, DashboardSessionId};
use std::fmt;

/// Errors from parsing upstream frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The frame is not valid JSON or lacks required fields.
    Malformed { reason: String },
    /// The frame has a `type` this relay does not understand.
    Unknown { message_type: String },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed upstream message: {reason}"),
            Self::Unknown { message_type } => {
                write!(f, "unknown upstream message type '{message_type}'")
            }
        }
    }
}

impl std::error::Error for WireError {}

/// Errors from a single connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// No endpoint could be issued for the attempt.
    EndpointUnavailable { message: String },
    /// The upstream handshake failed.
    Handshake { message: String },
    /// The attempt did not complete in time.
    TimedOut { after_ms: u64 },
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndpointUnavailable { message } => {
                write!(f, "no upstream endpoint available: {message}")
            }
            Self::Handshake { message } => write!(f, "upstream handshake failed: {message}"),
            Self::TimedOut { after_ms } => write!(f, "connection attempt timed out after {after_ms}ms"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Errors from sending through a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport is not connected; the command was dropped.
    NotConnected { state: ConnectionState },
    /// The transport has shut down.
    Closed,
    /// The transport's command queue is full; the command was dropped.
    Backpressure,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected { state } => write!(f, "transport is {state}, not connected"),
            Self::Closed => write!(f, "transport is closed"),
            Self::Backpressure => write!(f, "transport command queue is full"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors from local tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// No executor is registered for the tool.
    NotFound { name: String },
    /// The tool ran and failed.
    ExecutionFailed { name: String, reason: String },
    /// The arguments were not acceptable.
    InvalidInput { name: String, reason: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "tool not found: {name}"),
            Self::ExecutionFailed { name, reason } => {
                write!(f, "tool '{name}' execution failed: {reason}")
            }
            Self::InvalidInput { name, reason } => {
                write!(f, "invalid input for tool '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors from tool-call correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallError {
    /// A request with this correlation id is already pending.
    AlreadyPending { correlation_id: CorrelationId },
}

impl fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPending { correlation_id } => {
                write!(f, "tool call {correlation_id} is already pending")
            }
        }
    }
}

impl std::error::Error for ToolCallError {}

/// Errors from hub operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The dashboard session is not registered.
    UnknownSession { session_id: DashboardSessionId },
    /// The dashboard session is already registered.
    SessionExists { session_id: DashboardSessionId },
    /// The session is not subscribed to the conversation it addressed.
    NotSubscribed {
        session_id: DashboardSessionId,
        conversation_id: ConversationId,
    },
    /// No live transport exists for the conversation.
    ConversationNotFound { conversation_id: ConversationId },
    /// The conversation's transport refused the command.
    Transport {
        conversation_id: ConversationId,
        error: TransportError,
    },
    /// A dashboard frame could not be understood.
    InvalidCommand { reason: String },
    /// The hub has shut down.
    HubUnavailable,
}

impl RelayError {
    /// Returns the stable machine-readable code sent to dashboards.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownSession { .. } => "unknown_session",
            Self::SessionExists { .. } => "session_exists",
            Self::NotSubscribed { .. } => "not_subscribed",
            Self::ConversationNotFound { .. } => "conversation_not_found",
            Self::Transport { .. } => "not_connected",
            Self::InvalidCommand { .. } => "invalid_command",
            Self::HubUnavailable => "hub_unavailable",
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSession { session_id } => write!(f, "unknown session {session_id}"),
            Self::SessionExists { session_id } => {
                write!(f, "session {session_id} is already registered")
            }
            Self::NotSubscribed {
                session_id,
                conversation_id,
            } => write!(f, "session {session_id} is not subscribed to {conversation_id}"),
            Self::ConversationNotFound { conversation_id } => {
                write!(f, "conversation {conversation_id} is not live")
            }
            Self::Transport {
                conversation_id,
                error,
            } => write!(f, "conversation {conversation_id}: {error}"),
            Self::InvalidCommand { reason } => write!(f, "invalid command: {reason}"),
            Self::HubUnavailable => write!(f, "relay hub is not running"),
        }
    }
}

impl std::error::Error for RelayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_error_codes_are_stable() {
        let conversation_id = ConversationId::new("conv1").unwrap();
        let session_id = DashboardSessionId::new();

        let err = RelayError::NotSubscribed {
            session_id,
            conversation_id: conversation_id.clone(),
        };
        assert_eq!(err.code(), "not_subscribed");
        assert!(err.to_string().contains("conv1"));

        let err = RelayError::Transport {
            conversation_id,
            error: TransportError::NotConnected {
                state: ConnectionState::Reconnecting,
            },
        };
        assert_eq!(err.code(), "not_connected");
        assert!(err.to_string().contains("reconnecting"));
    }

    #[test]
    fn tool_error_display() {
        let err = ToolError::ExecutionFailed {
            name: "search_catalog".to_string(),
            reason: "index offline".to_string(),
        };
        assert!(err.to_string().contains("search_catalog"));
        assert!(err.to_string().contains("index offline"));
    }

    #[test]
    fn wire_error_display() {
        let err = WireError::Unknown {
            message_type: "vad_score".to_string(),
        };
        assert!(err.to_string().contains("vad_score"));
    }
}

//! Real-time conversation relay.
//!
//! Each live conversation owns one [`ConversationTransport`]: a task that
//! keeps a WebSocket to the voice-AI provider alive, translates its frames
//! into [`DomainEvent`]s, and reconnects with bounded exponential backoff.
//! The [`RelayHub`] fans those events out to subscribed dashboard sessions,
//! routes dashboard commands back upstream, and settles tool calls through
//! a per-conversation [`ToolCallCorrelator`].

pub mod correlator;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod hub;
pub mod lifecycle;
pub mod link;
pub mod protocol;
pub mod tool;
pub mod transport;
pub mod wire;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;

pub use correlator::{PendingToolCall, ToolCallCorrelator, ToolCallRequest, ToolOutcome};
pub use endpoint::{SignedUrlConfig, SignedUrlProvider};
pub use error::{ConnectError, RelayError, ToolCallError, ToolError, TransportError, WireError};
pub use event::{DomainEvent, Termination, TransportId, TransportNotice, TransportUpdate};
pub use hub::{HubConfig, HubStats, OpenConversation, RelayHub};
pub use lifecycle::{LifecycleMachine, ReconnectPolicy};
pub use link::{Endpoint, EndpointProvider, LinkCommand, LinkEvent, UpstreamConnector, UpstreamLink};
pub use protocol::{DashboardCommand, DashboardEvent, DashboardSubscription};
pub use tool::{ToolDefinition, ToolExecutor, ToolRegistry, ToolResult};
pub use transport::{ConversationTransport, HeartbeatConfig, Initiation, TransportConfig};
pub use wire::{InboundMessage, OutboundMessage};
pub use ws::WebSocketConnector;

//! The seam between a transport and the network.
//!
//! A transport never touches a socket. It asks an [`EndpointProvider`] for
//! a single-use [`Endpoint`], hands it to an [`UpstreamConnector`], and
//! talks to the resulting [`UpstreamLink`] over two channels.

use crate::error::ConnectError;
use async_trait::async_trait;
use callrelay_core::ConversationId;
use tokio::sync::mpsc;

/// A freshly issued upstream address. Consumed by one connection attempt.
#[derive(Debug, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn into_url(self) -> String {
        self.url
    }
}

/// Issues endpoints, one per connection attempt.
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    /// Issues a new endpoint for the conversation.
    async fn issue(&self, conversation_id: &ConversationId) -> Result<Endpoint, ConnectError>;
}

/// Commands from the transport to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Send a text frame.
    Send(String),
    /// Send a link-level liveness probe.
    Probe,
    /// Close gracefully.
    Close,
}

/// Events from the link to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame arrived.
    Frame(String),
    /// Link-level liveness traffic arrived (probe reply or peer probe).
    Alive,
    /// The peer closed the connection.
    Closed { code: Option<u16>, reason: String },
    /// The connection failed.
    Error(String),
}

impl LinkEvent {
    /// Close code for a normal closure.
    pub const NORMAL_CLOSURE: u16 = 1000;
}

/// An established connection. Dropping `inbound` without having seen
/// [`LinkEvent::Closed`] counts as an unclean close.
#[derive(Debug)]
pub struct UpstreamLink {
    pub outbound: mpsc::Sender<LinkCommand>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Establishes upstream links.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Performs the handshake against `endpoint`.
    async fn connect(&self, endpoint: Endpoint) -> Result<UpstreamLink, ConnectError>;
}

//! In-process fakes for the upstream seam.

use crate::error::ConnectError;
use crate::lifecycle::ReconnectPolicy;
use crate::link::{Endpoint, EndpointProvider, LinkCommand, LinkEvent, UpstreamConnector, UpstreamLink};
use crate::transport::{HeartbeatConfig, TransportConfig};
use async_trait::async_trait;
use callrelay_core::ConversationId;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Deterministic timings: no jitter, and heartbeats far enough out that
/// they never fire unless a test opts in.
pub(crate) fn test_transport_config() -> TransportConfig {
    TransportConfig {
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: 0.0,
        },
        heartbeat: HeartbeatConfig {
            interval: Duration::from_secs(3600),
            timeout: Duration::from_secs(7200),
        },
        connect_timeout: Duration::from_secs(10),
        command_buffer: 32,
    }
}

#[derive(Default)]
pub(crate) struct CountingEndpoints {
    issued: AtomicUsize,
}

#[async_trait]
impl EndpointProvider for CountingEndpoints {
    async fn issue(&self, conversation_id: &ConversationId) -> Result<Endpoint, ConnectError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(Endpoint::new(format!(
            "wss://upstream.test/{conversation_id}?token={n}"
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
    Accept,
    Refuse,
}

/// Connector whose attempts follow a script of accept/refuse outcomes.
pub(crate) struct FakeConnector {
    plans: Mutex<VecDeque<Plan>>,
    fallback: Plan,
    attempts: Mutex<Vec<(Instant, String)>>,
    remotes: mpsc::UnboundedSender<FakeRemote>,
}

impl FakeConnector {
    pub(crate) fn new(
        plans: impl IntoIterator<Item = Plan>,
        fallback: Plan,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        let (remotes, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            plans: Mutex::new(plans.into_iter().collect()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            remotes,
        };
        (Arc::new(connector), accepted)
    }

    pub(crate) fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        Self::new([], Plan::Accept)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }
}

#[async_trait]
impl UpstreamConnector for FakeConnector {
    async fn connect(&self, endpoint: Endpoint) -> Result<UpstreamLink, ConnectError> {
        self.attempts
            .lock()
            .unwrap()
            .push((Instant::now(), endpoint.into_url()));

        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(self.fallback);
        if plan == Plan::Refuse {
            return Err(ConnectError::Handshake {
                message: "connection refused".to_string(),
            });
        }

        let (outbound, commands) = mpsc::channel(64);
        let (events, inbound) = mpsc::channel(64);
        let _ = self.remotes.send(FakeRemote { events, commands });
        Ok(UpstreamLink { outbound, inbound })
    }
}

/// The far end of an accepted fake link. Dropping it is an unclean close.
pub(crate) struct FakeRemote {
    pub(crate) events: mpsc::Sender<LinkEvent>,
    pub(crate) commands: mpsc::Receiver<LinkCommand>,
}

impl FakeRemote {
    pub(crate) async fn push(&self, frame: JsonValue) {
        self.push_raw(&frame.to_string()).await;
    }

    pub(crate) async fn push_raw(&self, frame: &str) {
        self.events
            .send(LinkEvent::Frame(frame.to_string()))
            .await
            .unwrap();
    }

    /// Next frame the transport sent, skipping probes; `None` once the
    /// transport closed the link.
    pub(crate) async fn next_frame(&mut self) -> Option<JsonValue> {
        loop {
            match self.commands.recv().await? {
                LinkCommand::Send(text) => return Some(serde_json::from_str(&text).unwrap()),
                LinkCommand::Probe => {}
                LinkCommand::Close => return None,
            }
        }
    }
}

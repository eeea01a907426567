//! Per-conversation upstream transport.
//!
//! A `ConversationTransport` is a cheap handle over a driver task that owns
//! the upstream link, the heartbeat, and the reconnect loop. The driver
//! reports to its owner through [`TransportUpdate`]s; the last one it ever
//! sends is exactly one [`TransportNotice::Terminated`].

use crate::error::{ConnectError, TransportError, WireError};
use crate::event::{DomainEvent, Termination, TransportId, TransportNotice, TransportUpdate};
use crate::lifecycle::{LifecycleInput, LifecycleMachine, ReconnectPolicy, RetryDecision};
use crate::link::{EndpointProvider, LinkCommand, LinkEvent, UpstreamConnector, UpstreamLink};
use crate::wire::{self, InboundMessage, OutboundMessage};
use callrelay_core::{ConnectionState, ConversationId};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Liveness probing while connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often a probe is sent.
    pub interval: Duration,
    /// How long the link may stay silent before it is considered dead.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(25),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub reconnect: ReconnectPolicy,
    pub heartbeat: HeartbeatConfig,
    /// Bound on endpoint issuance plus handshake.
    pub connect_timeout: Duration,
    /// Capacity of the outbound command queue.
    pub command_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
            command_buffer: 64,
        }
    }
}

/// Payload of the `initiate` message sent after every handshake.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Initiation {
    pub agent_config: JsonValue,
    pub dynamic_variables: BTreeMap<String, String>,
}

impl Initiation {
    fn to_message(&self) -> OutboundMessage {
        OutboundMessage::Initiate {
            agent_config: self.agent_config.clone(),
            dynamic_variables: self.dynamic_variables.clone(),
        }
    }
}

/// Everything a transport needs to run.
pub struct TransportContext {
    pub conversation_id: ConversationId,
    pub transport_id: TransportId,
    pub initiation: Initiation,
    pub config: TransportConfig,
    pub endpoints: Arc<dyn EndpointProvider>,
    pub connector: Arc<dyn UpstreamConnector>,
    pub updates: mpsc::UnboundedSender<TransportUpdate>,
}

/// Handle to a running transport.
#[derive(Clone)]
pub struct ConversationTransport {
    id: TransportId,
    conversation_id: ConversationId,
    commands: mpsc::Sender<OutboundMessage>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    close_reason: Arc<Mutex<Option<String>>>,
}

impl ConversationTransport {
    /// Starts the driver task; it connects immediately.
    #[must_use]
    pub fn spawn(context: TransportContext) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(context.config.command_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();
        let close_reason = Arc::new(Mutex::new(None));

        let span = info_span!(
            "transport",
            conversation_id = %context.conversation_id,
            transport_id = context.transport_id.0,
        );
        let handle = Self {
            id: context.transport_id,
            conversation_id: context.conversation_id.clone(),
            commands: commands_tx,
            state: state_rx,
            cancel: cancel.clone(),
            close_reason: Arc::clone(&close_reason),
        };

        let driver = Driver {
            machine: LifecycleMachine::new(context.config.reconnect.clone()),
            conversation_id: context.conversation_id,
            transport_id: context.transport_id,
            initiation: context.initiation,
            config: context.config,
            endpoints: context.endpoints,
            connector: context.connector,
            updates: context.updates,
            commands: commands_rx,
            state: state_tx,
            cancel,
            close_reason,
        };
        tokio::spawn(driver.run().instrument(span));

        handle
    }

    #[must_use]
    pub fn id(&self) -> TransportId {
        self.id
    }

    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queues a message for the upstream. Only valid while connected;
    /// nothing is buffered across a disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] outside `connected`,
    /// [`TransportError::Backpressure`] if the queue is full, and
    /// [`TransportError::Closed`] once the transport has terminated.
    pub fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(TransportError::Closed);
        }
        if state != ConnectionState::Connected {
            return Err(TransportError::NotConnected { state });
        }

        self.commands.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Requests a graceful close. The first reason given wins.
    pub fn close(&self, reason: impl Into<String>) {
        let mut slot = self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        drop(slot);
        self.cancel.cancel();
    }

    /// Resolves once the transport reaches a terminal state.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(ConnectionState::is_terminal).await;
    }
}

/// How a connected phase ended.
enum LinkExit {
    Ended { reason: String },
    Closed,
    Lost { error: String },
}

struct Driver {
    machine: LifecycleMachine,
    conversation_id: ConversationId,
    transport_id: TransportId,
    initiation: Initiation,
    config: TransportConfig,
    endpoints: Arc<dyn EndpointProvider>,
    connector: Arc<dyn UpstreamConnector>,
    updates: mpsc::UnboundedSender<TransportUpdate>,
    commands: mpsc::Receiver<OutboundMessage>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    close_reason: Arc<Mutex<Option<String>>>,
}

impl Driver {
    async fn run(mut self) {
        let termination = self.drive().await;
        let final_state = termination.final_state();

        self.state.send_replace(final_state);
        info!(reason = termination.reason(), state = %final_state, "transport terminated");
        self.notify(TransportNotice::Terminated(termination));
    }

    async fn drive(&mut self) -> Termination {
        self.advance(LifecycleInput::Connect);
        let mut last_error = String::new();

        loop {
            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return self.closed_by_owner(),
                attempt = self.connect() => attempt,
            };

            match attempt {
                Ok(link) => {
                    self.advance(LifecycleInput::HandshakeSucceeded);
                    info!("upstream connected");

                    let exit = self.pump(link).await;
                    self.discard_queued_commands();
                    match exit {
                        LinkExit::Ended { reason } => {
                            self.advance(LifecycleInput::SessionEnded);
                            return Termination::Ended { reason };
                        }
                        LinkExit::Closed => return self.closed_by_owner(),
                        LinkExit::Lost { error } => {
                            warn!(error, "upstream connection lost");
                            self.advance(LifecycleInput::ConnectionLost);
                            self.emit(DomainEvent::TransportError {
                                message: error.clone(),
                            });
                            last_error = error;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt = self.machine.attempts(), "upstream connect failed");
                    self.advance(LifecycleInput::ConnectFailed);
                    last_error = e.to_string();
                }
            }

            let decision = match self.machine.schedule_retry(&mut rand::thread_rng()) {
                Ok(decision) => decision,
                Err(e) => {
                    error!(error = %e, "reconnect scheduled from an unexpected state");
                    return Termination::Failed {
                        attempts: self.machine.attempts(),
                        last_error,
                    };
                }
            };
            self.publish_state();

            match decision {
                RetryDecision::Retry { attempt, delay } => {
                    info!(
                        attempt,
                        max_attempts = self.config.reconnect.max_attempts,
                        backoff_ms = delay.as_millis(),
                        "scheduling upstream reconnect"
                    );
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return self.closed_by_owner(),
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.advance(LifecycleInput::RetryDue);
                }
                RetryDecision::GiveUp { attempts } => {
                    error!(attempts, last_error, "upstream reconnect budget exhausted");
                    return Termination::Failed {
                        attempts,
                        last_error,
                    };
                }
            }
        }
    }

    /// One connection attempt against a freshly issued endpoint.
    async fn connect(&self) -> Result<UpstreamLink, ConnectError> {
        let timeout = self.config.connect_timeout;
        let attempt = async {
            let endpoint = self.endpoints.issue(&self.conversation_id).await?;
            self.connector.connect(endpoint).await
        };

        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| ConnectError::TimedOut {
                after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    async fn pump(&mut self, link: UpstreamLink) -> LinkExit {
        let UpstreamLink {
            outbound,
            mut inbound,
        } = link;

        if let Err(error) = write(&outbound, &self.initiation.to_message()).await {
            return LinkExit::Lost { error };
        }

        let heartbeat = self.config.heartbeat.clone();
        let mut probe = tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = outbound.try_send(LinkCommand::Close);
                    return LinkExit::Closed;
                }
                event = inbound.recv() => match event {
                    Some(LinkEvent::Frame(text)) => {
                        last_seen = Instant::now();
                        if let Some(exit) = self.on_frame(&text, &outbound).await {
                            return exit;
                        }
                    }
                    Some(LinkEvent::Alive) => last_seen = Instant::now(),
                    Some(LinkEvent::Closed { code: Some(LinkEvent::NORMAL_CLOSURE), reason }) => {
                        let reason = if reason.is_empty() { "upstream_closed".to_string() } else { reason };
                        return LinkExit::Ended { reason };
                    }
                    Some(LinkEvent::Closed { code, reason }) => {
                        return LinkExit::Lost {
                            error: format!("upstream closed uncleanly (code {code:?}): {reason}"),
                        };
                    }
                    Some(LinkEvent::Error(error)) => return LinkExit::Lost { error },
                    None => {
                        return LinkExit::Lost {
                            error: "upstream link dropped".to_string(),
                        };
                    }
                },
                command = self.commands.recv() => match command {
                    Some(message) => {
                        if let Err(error) = write(&outbound, &message).await {
                            return LinkExit::Lost { error };
                        }
                    }
                    None => {
                        let _ = outbound.try_send(LinkCommand::Close);
                        return LinkExit::Closed;
                    }
                },
                _ = probe.tick() => {
                    if last_seen.elapsed() >= heartbeat.timeout {
                        return LinkExit::Lost {
                            error: format!("no upstream traffic for {}ms", last_seen.elapsed().as_millis()),
                        };
                    }
                    if outbound.try_send(LinkCommand::Probe).is_err() {
                        debug!("liveness probe skipped; link busy");
                    }
                }
            }
        }
    }

    async fn on_frame(&self, frame: &str, outbound: &mpsc::Sender<LinkCommand>) -> Option<LinkExit> {
        let message = match wire::parse_inbound(frame) {
            Ok(message) => message,
            Err(WireError::Unknown { message_type }) => {
                debug!(message_type, "dropping unknown upstream message");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed upstream message");
                return None;
            }
        };

        if let InboundMessage::Ping { event_id } = &message {
            let pong = OutboundMessage::Pong {
                event_id: *event_id,
            };
            if let Err(error) = write(outbound, &pong).await {
                return Some(LinkExit::Lost { error });
            }
        }

        let ended = match &message {
            InboundMessage::SessionEnded { reason, .. } => Some(reason.clone()),
            _ => None,
        };

        if let Some(event) = DomainEvent::from_inbound(message) {
            self.emit(event);
        }

        ended.map(|reason| {
            let _ = outbound.try_send(LinkCommand::Close);
            LinkExit::Ended { reason }
        })
    }

    fn closed_by_owner(&mut self) -> Termination {
        self.advance(LifecycleInput::CloseRequested);
        let reason = self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "closed".to_string());
        Termination::Closed { reason }
    }

    fn discard_queued_commands(&mut self) {
        let mut dropped = 0usize;
        while self.commands.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded commands queued before disconnect");
        }
    }

    fn advance(&mut self, input: LifecycleInput) {
        match self.machine.apply(input) {
            Ok(_) => self.publish_state(),
            Err(e) => warn!(error = %e, "ignored lifecycle input"),
        }
    }

    fn publish_state(&mut self) {
        let state = self.machine.state();
        if state.is_terminal() {
            // The terminal state is published together with `Terminated`.
            return;
        }
        self.state.send_replace(state);
        self.notify(TransportNotice::StateChanged(state));
    }

    fn emit(&self, event: DomainEvent) {
        self.notify(TransportNotice::Event(event));
    }

    fn notify(&self, notice: TransportNotice) {
        let update = TransportUpdate {
            conversation_id: self.conversation_id.clone(),
            transport_id: self.transport_id,
            notice,
        };
        if self.updates.send(update).is_err() {
            debug!("transport owner is gone");
        }
    }
}

async fn write(outbound: &mpsc::Sender<LinkCommand>, message: &OutboundMessage) -> Result<(), String> {
    let frame = match message.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(kind = message.kind(), error = %e, "dropping unencodable outbound message");
            return Ok(());
        }
    };

    outbound
        .send(LinkCommand::Send(frame))
        .await
        .map_err(|_| "upstream link closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingEndpoints, FakeConnector, Plan, test_transport_config};
    use serde_json::json;

    fn conv() -> ConversationId {
        ConversationId::new("conv1").unwrap()
    }

    fn spawn(
        connector: Arc<FakeConnector>,
        config: TransportConfig,
    ) -> (ConversationTransport, mpsc::UnboundedReceiver<TransportUpdate>) {
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let transport = ConversationTransport::spawn(TransportContext {
            conversation_id: conv(),
            transport_id: TransportId(1),
            initiation: Initiation {
                agent_config: json!({"first_message": "Hello!"}),
                dynamic_variables: BTreeMap::from([("customer_name".to_string(), "Dana".to_string())]),
            },
            config,
            endpoints: Arc::new(CountingEndpoints::default()),
            connector,
            updates: updates_tx,
        });
        (transport, updates)
    }

    async fn until_state(updates: &mut mpsc::UnboundedReceiver<TransportUpdate>, wanted: ConnectionState) {
        while let Some(update) = updates.recv().await {
            if update.notice == TransportNotice::StateChanged(wanted) {
                return;
            }
        }
        panic!("transport stopped before reaching {wanted}");
    }

    async fn next_event(updates: &mut mpsc::UnboundedReceiver<TransportUpdate>) -> DomainEvent {
        while let Some(update) = updates.recv().await {
            if let TransportNotice::Event(event) = update.notice {
                return event;
            }
        }
        panic!("transport stopped before emitting an event");
    }

    async fn drain(mut updates: mpsc::UnboundedReceiver<TransportUpdate>) -> Vec<TransportNotice> {
        let mut notices = Vec::new();
        while let Some(update) = updates.recv().await {
            notices.push(update.notice);
        }
        notices
    }

    fn terminations(notices: &[TransportNotice]) -> Vec<Termination> {
        notices
            .iter()
            .filter_map(|n| match n {
                TransportNotice::Terminated(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn initiates_then_translates_frames() {
        let (connector, mut remotes) = FakeConnector::accepting();
        let (transport, mut updates) = spawn(connector, test_transport_config());

        let mut remote = remotes.recv().await.unwrap();
        let initiate = remote.next_frame().await.unwrap();
        assert_eq!(initiate["type"], "initiate");
        assert_eq!(initiate["dynamic_variables"]["customer_name"], "Dana");
        until_state(&mut updates, ConnectionState::Connected).await;
        assert_eq!(transport.state(), ConnectionState::Connected);

        remote
            .push(json!({"type": "session_metadata", "conversation_id": "up_9"}))
            .await;
        remote.push(json!({"type": "vad_score", "score": 0.9})).await;
        remote.push_raw("{garbage").await;
        remote
            .push(json!({"type": "agent_utterance", "text": "Hi there"}))
            .await;

        assert_eq!(
            next_event(&mut updates).await,
            DomainEvent::HandshakeMetadata {
                upstream_conversation_id: "up_9".to_string()
            }
        );
        assert_eq!(
            next_event(&mut updates).await,
            DomainEvent::AgentUtterance {
                text: "Hi there".to_string()
            }
        );
        assert_eq!(transport.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn answers_ping_with_pong() {
        let (connector, mut remotes) = FakeConnector::accepting();
        let (_transport, mut updates) = spawn(connector, test_transport_config());

        let mut remote = remotes.recv().await.unwrap();
        remote.next_frame().await.unwrap();
        remote.push(json!({"type": "ping", "event_id": 7})).await;

        let pong = remote.next_frame().await.unwrap();
        assert_eq!(pong, json!({"type": "pong", "event_id": 7}));
        assert_eq!(
            next_event(&mut updates).await,
            DomainEvent::LivenessProbe { event_id: 7 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_is_forwarded_while_connected() {
        let (connector, mut remotes) = FakeConnector::accepting();
        let (transport, mut updates) = spawn(connector, test_transport_config());

        let mut remote = remotes.recv().await.unwrap();
        remote.next_frame().await.unwrap();
        until_state(&mut updates, ConnectionState::Connected).await;

        transport
            .send(OutboundMessage::UserMessage {
                text: "Where is my order?".to_string(),
            })
            .unwrap();

        let frame = remote.next_frame().await.unwrap();
        assert_eq!(frame["type"], "user_message");
        assert_eq!(frame["text"], "Where is my order?");
    }

    #[tokio::test(start_paused = true)]
    async fn send_is_rejected_while_not_connected() {
        let (connector, _remotes) = FakeConnector::new([], Plan::Refuse);
        let (transport, mut updates) = spawn(connector, test_transport_config());

        until_state(&mut updates, ConnectionState::Reconnecting).await;
        let err = transport
            .send(OutboundMessage::ContextualUpdate {
                text: "vip".to_string(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::NotConnected {
                state: ConnectionState::Reconnecting
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_end_terminates_once() {
        let (connector, mut remotes) = FakeConnector::accepting();
        let (transport, updates) = spawn(connector.clone(), test_transport_config());

        let mut remote = remotes.recv().await.unwrap();
        remote.next_frame().await.unwrap();
        remote
            .push(json!({"type": "session_ended", "reason": "agent_hangup", "duration_ms": 42000}))
            .await;

        let notices = drain(updates).await;
        assert_eq!(
            terminations(&notices),
            vec![Termination::Ended {
                reason: "agent_hangup".to_string()
            }]
        );
        assert!(matches!(notices.last(), Some(TransportNotice::Terminated(_))));
        assert_eq!(transport.state(), ConnectionState::Ended);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(transport.send(OutboundMessage::Pong { event_id: 1 }), Err(TransportError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn unclean_loss_backs_off_then_fails() {
        let (connector, mut remotes) = FakeConnector::new([Plan::Accept], Plan::Refuse);
        let (transport, mut updates) = spawn(connector.clone(), test_transport_config());

        let remote = remotes.recv().await.unwrap();
        until_state(&mut updates, ConnectionState::Connected).await;
        let lost_at = Instant::now();
        drop(remote);

        let notices = drain(updates).await;

        let times = connector.attempt_times();
        assert_eq!(times.len(), 6);
        let mut previous = lost_at;
        for (retry, expected_secs) in times[1..].iter().zip([1u64, 2, 4, 8, 16]) {
            let gap = *retry - previous;
            let expected = Duration::from_secs(expected_secs);
            assert!(gap >= expected && gap < expected + Duration::from_millis(50), "{gap:?}");
            previous = *retry;
        }

        let terminal = terminations(&notices);
        assert_eq!(terminal.len(), 1);
        assert!(matches!(terminal[0], Termination::Failed { attempts: 5, .. }));
        assert!(notices.iter().any(|n| matches!(
            n,
            TransportNotice::Event(DomainEvent::TransportError { .. })
        )));
        assert_eq!(transport.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_uses_a_fresh_endpoint() {
        let (connector, _remotes) = FakeConnector::new([], Plan::Refuse);
        let (transport, updates) = spawn(connector.clone(), test_transport_config());

        drain(updates).await;
        transport.closed().await;

        let urls = connector.urls();
        assert_eq!(urls.len(), 6);
        let mut unique = urls.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), urls.len());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_link_is_declared_dead() {
        let mut config = test_transport_config();
        config.heartbeat = HeartbeatConfig {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
        };
        let (connector, mut remotes) = FakeConnector::new([Plan::Accept, Plan::Accept], Plan::Refuse);
        let (transport, mut updates) = spawn(connector.clone(), config);

        let mut first = remotes.recv().await.unwrap();
        first.next_frame().await.unwrap();
        until_state(&mut updates, ConnectionState::Connected).await;
        let connected_at = Instant::now();

        let event = next_event(&mut updates).await;
        assert!(matches!(event, DomainEvent::TransportError { .. }));
        assert!(connected_at.elapsed() >= Duration::from_secs(3));

        let _second = remotes.recv().await.unwrap();
        until_state(&mut updates, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(transport.state(), ConnectionState::Connected);
        drop(first);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_backoff_ends_promptly() {
        let (connector, _remotes) = FakeConnector::new([], Plan::Refuse);
        let (transport, mut updates) = spawn(connector.clone(), test_transport_config());

        until_state(&mut updates, ConnectionState::Reconnecting).await;
        transport.close("operator_hangup");
        transport.close("ignored");

        let notices = drain(updates).await;
        assert_eq!(
            terminations(&notices),
            vec![Termination::Closed {
                reason: "operator_hangup".to_string()
            }]
        );
        assert_eq!(connector.attempts(), 1);
        assert_eq!(transport.state(), ConnectionState::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn close_while_connected_closes_link() {
        let (connector, mut remotes) = FakeConnector::accepting();
        let (transport, mut updates) = spawn(connector, test_transport_config());

        let mut remote = remotes.recv().await.unwrap();
        remote.next_frame().await.unwrap();
        until_state(&mut updates, ConnectionState::Connected).await;

        transport.close("call_completed");
        assert_eq!(remote.next_frame().await, None);
        transport.closed().await;

        let notices = drain(updates).await;
        assert_eq!(
            terminations(&notices),
            vec![Termination::Closed {
                reason: "call_completed".to_string()
            }]
        );
    }
}

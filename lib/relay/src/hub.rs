//! Relay hub: the registry of live conversations and dashboard sessions.
//!
//! All mutable state lives in one actor task. [`RelayHub`] is a cloneable
//! handle that sends requests carrying oneshot replies; transports report
//! through a second channel drained by the same task. Every registry change
//! therefore happens in a single step with no locks held across I/O.
//!
//! Delivery to dashboards never awaits: each session has a bounded queue,
//! a full queue drops the event for that session only, and a closed queue
//! removes the session.

use crate::correlator::{ToolCallCorrelator, ToolCallRequest};
use crate::error::RelayError;
use crate::event::{DomainEvent, Termination, TransportId, TransportNotice, TransportUpdate};
use crate::link::{EndpointProvider, UpstreamConnector};
use crate::protocol::{DashboardCommand, DashboardEvent, DashboardSubscription};
use crate::tool::{ToolRegistry, ToolResult};
use crate::transport::{ConversationTransport, Initiation, TransportConfig, TransportContext};
use crate::wire::OutboundMessage;
use callrelay_core::{ConnectionState, ConversationId, ConversationSession, CustomerId, DashboardSessionId};
use callrelay_store::ConversationStateStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub transport: TransportConfig,
    /// How long a tool call may stay unresolved.
    pub tool_timeout: Duration,
    /// Per-session outbound queue capacity.
    pub session_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            tool_timeout: Duration::from_secs(10),
            session_buffer: 256,
        }
    }
}

/// Request to start relaying a conversation.
#[derive(Debug, Clone)]
pub struct OpenConversation {
    pub conversation_id: ConversationId,
    pub owner: Option<CustomerId>,
    pub initiation: Initiation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub live_conversations: usize,
    pub dashboard_sessions: usize,
}

enum HubRequest {
    Open {
        request: OpenConversation,
        endpoints: Arc<dyn EndpointProvider>,
        reply: oneshot::Sender<ConversationTransport>,
    },
    Close {
        conversation_id: ConversationId,
        reason: String,
        reply: oneshot::Sender<bool>,
    },
    RegisterSession {
        session_id: DashboardSessionId,
        reply: oneshot::Sender<Result<mpsc::Receiver<DashboardEvent>, RelayError>>,
    },
    RemoveSession {
        session_id: DashboardSessionId,
        reply: oneshot::Sender<bool>,
    },
    Command {
        session_id: DashboardSessionId,
        command: DashboardCommand,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    Notify {
        session_id: DashboardSessionId,
        event: DashboardEvent,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        conversation_id: ConversationId,
        event: DomainEvent,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        conversation_id: ConversationId,
        reply: oneshot::Sender<Option<ConversationSession>>,
    },
    Subscriptions {
        session_id: DashboardSessionId,
        reply: oneshot::Sender<Vec<DashboardSubscription>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown {
        reply: oneshot::Sender<Vec<JoinHandle<()>>>,
    },
}

/// Handle to the relay hub.
#[derive(Clone)]
pub struct RelayHub {
    requests: mpsc::UnboundedSender<HubRequest>,
    state_store: ConversationStateStore,
}

impl RelayHub {
    /// Starts the hub actor.
    #[must_use]
    pub fn spawn(
        config: HubConfig,
        connector: Arc<dyn UpstreamConnector>,
        state_store: ConversationStateStore,
        tools: ToolRegistry,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let actor = HubActor {
            config,
            connector,
            state_store: state_store.clone(),
            tools: Arc::new(tools),
            conversations: HashMap::new(),
            sessions: SessionRegistry::default(),
            updates: updates_tx,
            next_transport_id: 0,
            flushing: Vec::new(),
        };
        tokio::spawn(actor.run(requests_rx, updates_rx));

        Self {
            requests: requests_tx,
            state_store,
        }
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> HubRequest) -> Result<T, RelayError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .map_err(|_| RelayError::HubUnavailable)?;
        response.await.map_err(|_| RelayError::HubUnavailable)
    }

    /// Starts a transport for the conversation, or returns the live one.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] after shutdown.
    pub async fn open_conversation(
        &self,
        request: OpenConversation,
        endpoints: Arc<dyn EndpointProvider>,
    ) -> Result<ConversationTransport, RelayError> {
        self.call(|reply| HubRequest::Open {
            request,
            endpoints,
            reply,
        })
        .await
    }

    /// Closes a conversation and waits until its final state is recorded
    /// and subscribers are told. Returns false if it was not live.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] after shutdown.
    pub async fn close_conversation(
        &self,
        conversation_id: ConversationId,
        reason: impl Into<String>,
    ) -> Result<bool, RelayError> {
        let reason = reason.into();
        self.call(|reply| HubRequest::Close {
            conversation_id,
            reason,
            reply,
        })
        .await
    }

    /// Registers a dashboard session and returns its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SessionExists`] if the id is taken.
    pub async fn register_session(
        &self,
        session_id: DashboardSessionId,
    ) -> Result<mpsc::Receiver<DashboardEvent>, RelayError> {
        self.call(|reply| HubRequest::RegisterSession { session_id, reply })
            .await?
    }

    /// Removes a session and all of its subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] after shutdown.
    pub async fn remove_session(&self, session_id: DashboardSessionId) -> Result<bool, RelayError> {
        self.call(|reply| HubRequest::RemoveSession { session_id, reply })
            .await
    }

    /// Applies a dashboard command. Failures are also pushed to the
    /// session as an `error` event.
    ///
    /// # Errors
    ///
    /// Returns the [`RelayError`] describing why the command was refused.
    pub async fn handle_command(
        &self,
        session_id: DashboardSessionId,
        command: DashboardCommand,
    ) -> Result<(), RelayError> {
        self.call(|reply| HubRequest::Command {
            session_id,
            command,
            reply,
        })
        .await?
    }

    /// Subscribes a session to a conversation. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownSession`] for unregistered sessions.
    pub async fn subscribe(
        &self,
        session_id: DashboardSessionId,
        conversation_id: ConversationId,
    ) -> Result<(), RelayError> {
        self.handle_command(session_id, DashboardCommand::Subscribe { conversation_id })
            .await
    }

    /// Unsubscribes a session from a conversation. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownSession`] for unregistered sessions.
    pub async fn unsubscribe(
        &self,
        session_id: DashboardSessionId,
        conversation_id: ConversationId,
    ) -> Result<(), RelayError> {
        self.handle_command(session_id, DashboardCommand::Unsubscribe { conversation_id })
            .await
    }

    /// Delivers an event to one session. Returns false if it was not
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] after shutdown.
    pub async fn notify(&self, session_id: DashboardSessionId, event: DashboardEvent) -> Result<bool, RelayError> {
        self.call(|reply| HubRequest::Notify {
            session_id,
            event,
            reply,
        })
        .await
    }

    /// Delivers an event to every subscriber of the conversation and
    /// returns how many sessions accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] after shutdown.
    pub async fn broadcast(&self, conversation_id: ConversationId, event: DomainEvent) -> Result<usize, RelayError> {
        self.call(|reply| HubRequest::Broadcast {
            conversation_id,
            event,
            reply,
        })
        .await
    }

    /// Returns the live snapshot, or the persisted one if the
    /// conversation is no longer live.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] after shutdown.
    pub async fn conversation_snapshot(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationSession>, RelayError> {
        let id = conversation_id.clone();
        if let Some(snapshot) = self
            .call(|reply| HubRequest::Snapshot {
                conversation_id: id,
                reply,
            })
            .await?
        {
            return Ok(Some(snapshot));
        }
        Ok(self.state_store.get(&conversation_id).await)
    }

    /// Lists a session's subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] after shutdown.
    pub async fn subscriptions(
        &self,
        session_id: DashboardSessionId,
    ) -> Result<Vec<DashboardSubscription>, RelayError> {
        self.call(|reply| HubRequest::Subscriptions { session_id, reply })
            .await
    }

    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] after shutdown.
    pub async fn stats(&self) -> Result<HubStats, RelayError> {
        self.call(|reply| HubRequest::Stats { reply }).await
    }

    /// Closes every conversation, flushes final snapshots, and stops the
    /// actor. Later calls on any handle fail with `HubUnavailable`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] if the hub already stopped.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        let flushing = self.call(|reply| HubRequest::Shutdown { reply }).await?;
        for flush in flushing {
            if let Err(e) = flush.await {
                warn!(error = %e, "snapshot flush failed during shutdown");
            }
        }
        Ok(())
    }
}

struct LiveConversation {
    transport: ConversationTransport,
    snapshot: ConversationSession,
    correlator: ToolCallCorrelator,
    writer: SnapshotWriter,
    close_waiters: Vec<oneshot::Sender<bool>>,
}

/// Persists snapshots in order, coalescing bursts to the latest one.
struct SnapshotWriter {
    snapshots: mpsc::UnboundedSender<ConversationSession>,
    task: JoinHandle<()>,
}

impl SnapshotWriter {
    fn spawn(store: ConversationStateStore, conversation_id: ConversationId) -> Self {
        let (snapshots, mut pending) = mpsc::unbounded_channel::<ConversationSession>();
        let task = tokio::spawn(async move {
            while let Some(mut snapshot) = pending.recv().await {
                while let Ok(newer) = pending.try_recv() {
                    snapshot = newer;
                }
                store.put_default(&conversation_id, &snapshot).await;
            }
        });
        Self { snapshots, task }
    }

    fn push(&self, snapshot: ConversationSession) {
        if self.snapshots.send(snapshot).is_err() {
            debug!("snapshot writer already stopped");
        }
    }

    /// Queues the final snapshot; the task exits once it is written.
    fn finish(self, snapshot: ConversationSession) -> JoinHandle<()> {
        self.push(snapshot);
        let Self { snapshots, task } = self;
        drop(snapshots);
        task
    }
}

#[derive(Default)]
struct SessionRegistry {
    sinks: HashMap<DashboardSessionId, mpsc::Sender<DashboardEvent>>,
    subscribers: HashMap<ConversationId, BTreeMap<DashboardSessionId, DateTime<Utc>>>,
}

impl SessionRegistry {
    fn contains(&self, session_id: DashboardSessionId) -> bool {
        self.sinks.contains_key(&session_id)
    }

    fn register(&mut self, session_id: DashboardSessionId, sink: mpsc::Sender<DashboardEvent>) {
        self.sinks.insert(session_id, sink);
    }

    fn remove(&mut self, session_id: DashboardSessionId) -> bool {
        let existed = self.sinks.remove(&session_id).is_some();
        self.subscribers.retain(|_, sessions| {
            sessions.remove(&session_id);
            !sessions.is_empty()
        });
        existed
    }

    fn subscribe(&mut self, session_id: DashboardSessionId, conversation_id: ConversationId) {
        self.subscribers
            .entry(conversation_id)
            .or_default()
            .entry(session_id)
            .or_insert_with(Utc::now);
    }

    fn unsubscribe(&mut self, session_id: DashboardSessionId, conversation_id: &ConversationId) {
        if let Some(sessions) = self.subscribers.get_mut(conversation_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                self.subscribers.remove(conversation_id);
            }
        }
    }

    fn is_subscribed(&self, session_id: DashboardSessionId, conversation_id: &ConversationId) -> bool {
        self.subscribers
            .get(conversation_id)
            .is_some_and(|sessions| sessions.contains_key(&session_id))
    }

    fn subscriptions_of(&self, session_id: DashboardSessionId) -> Vec<DashboardSubscription> {
        let mut subscriptions: Vec<_> = self
            .subscribers
            .iter()
            .filter_map(|(conversation_id, sessions)| {
                sessions.get(&session_id).map(|subscribed_at| DashboardSubscription {
                    session_id,
                    conversation_id: conversation_id.clone(),
                    subscribed_at: *subscribed_at,
                })
            })
            .collect();
        subscriptions.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        subscriptions
    }

    /// Delivers to one session. A closed session is removed.
    fn send_to(&mut self, session_id: DashboardSessionId, event: DashboardEvent) -> bool {
        let Some(sink) = self.sinks.get(&session_id) else {
            return false;
        };
        match sink.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %session_id, "dashboard session lagging; event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session_id = %session_id, "dashboard session gone; removing");
                self.remove(session_id);
                false
            }
        }
    }

    /// Delivers to every subscriber independently.
    fn broadcast(&mut self, conversation_id: &ConversationId, event: &DashboardEvent) -> usize {
        let Some(sessions) = self.subscribers.get(conversation_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for session_id in sessions.keys() {
            let Some(sink) = self.sinks.get(session_id) else {
                gone.push(*session_id);
                continue;
            };
            match sink.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        session_id = %session_id,
                        conversation_id = %conversation_id,
                        "dashboard session lagging; event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*session_id),
            }
        }

        for session_id in gone {
            debug!(session_id = %session_id, "dashboard session gone; removing");
            self.remove(session_id);
        }
        delivered
    }

    fn clear(&mut self) {
        self.sinks.clear();
        self.subscribers.clear();
    }
}

struct HubActor {
    config: HubConfig,
    connector: Arc<dyn UpstreamConnector>,
    state_store: ConversationStateStore,
    tools: Arc<ToolRegistry>,
    conversations: HashMap<ConversationId, LiveConversation>,
    sessions: SessionRegistry,
    updates: mpsc::UnboundedSender<TransportUpdate>,
    next_transport_id: u64,
    flushing: Vec<JoinHandle<()>>,
}

impl HubActor {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<HubRequest>,
        mut updates: mpsc::UnboundedReceiver<TransportUpdate>,
    ) {
        info!("relay hub started");
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(HubRequest::Shutdown { reply }) => {
                        let flushing = self.shutdown();
                        let _ = reply.send(flushing);
                        break;
                    }
                    Some(request) => self.handle(request),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(update) = updates.recv() => self.on_transport_update(update),
            }
        }
        info!("relay hub stopped");
    }

    fn handle(&mut self, request: HubRequest) {
        match request {
            HubRequest::Open {
                request,
                endpoints,
                reply,
            } => {
                let _ = reply.send(self.open(request, endpoints));
            }
            HubRequest::Close {
                conversation_id,
                reason,
                reply,
            } => match self.conversations.get_mut(&conversation_id) {
                Some(live) => {
                    info!(conversation_id = %conversation_id, reason, "closing conversation");
                    live.transport.close(reason);
                    live.close_waiters.push(reply);
                }
                None => {
                    let _ = reply.send(false);
                }
            },
            HubRequest::RegisterSession { session_id, reply } => {
                let _ = reply.send(self.register_session(session_id));
            }
            HubRequest::RemoveSession { session_id, reply } => {
                let removed = self.sessions.remove(session_id);
                if removed {
                    info!(session_id = %session_id, "dashboard session removed");
                }
                let _ = reply.send(removed);
            }
            HubRequest::Command {
                session_id,
                command,
                reply,
            } => {
                let result = self.command(session_id, command);
                if let Err(e) = &result {
                    debug!(session_id = %session_id, code = e.code(), error = %e, "dashboard command refused");
                    self.sessions.send_to(session_id, DashboardEvent::from_error(e));
                }
                let _ = reply.send(result);
            }
            HubRequest::Notify {
                session_id,
                event,
                reply,
            } => {
                let _ = reply.send(self.sessions.send_to(session_id, event));
            }
            HubRequest::Broadcast {
                conversation_id,
                event,
                reply,
            } => {
                let event = DashboardEvent::from_domain(conversation_id.clone(), &event);
                let _ = reply.send(self.sessions.broadcast(&conversation_id, &event));
            }
            HubRequest::Snapshot {
                conversation_id,
                reply,
            } => {
                let snapshot = self
                    .conversations
                    .get(&conversation_id)
                    .map(|live| live.snapshot.clone());
                let _ = reply.send(snapshot);
            }
            HubRequest::Subscriptions { session_id, reply } => {
                let _ = reply.send(self.sessions.subscriptions_of(session_id));
            }
            HubRequest::Stats { reply } => {
                let _ = reply.send(HubStats {
                    live_conversations: self.conversations.len(),
                    dashboard_sessions: self.sessions.sinks.len(),
                });
            }
            HubRequest::Shutdown { reply } => {
                let _ = reply.send(self.shutdown());
            }
        }
    }

    fn open(&mut self, request: OpenConversation, endpoints: Arc<dyn EndpointProvider>) -> ConversationTransport {
        let OpenConversation {
            conversation_id,
            owner,
            initiation,
        } = request;

        if let Some(live) = self.conversations.get(&conversation_id) {
            if !live.transport.state().is_terminal() {
                debug!(conversation_id = %conversation_id, "conversation already live");
                return live.transport.clone();
            }
        }

        // Terminated, but its final notice has not been processed yet.
        if let Some(stale) = self.conversations.remove(&conversation_id) {
            let termination = match stale.transport.state() {
                ConnectionState::Failed => Termination::Failed {
                    attempts: self.config.transport.reconnect.max_attempts,
                    last_error: "superseded".to_string(),
                },
                _ => Termination::Ended {
                    reason: "ended".to_string(),
                },
            };
            self.retire(&conversation_id, stale, &termination);
        }

        self.next_transport_id += 1;
        let transport_id = TransportId(self.next_transport_id);
        let transport = ConversationTransport::spawn(TransportContext {
            conversation_id: conversation_id.clone(),
            transport_id,
            initiation,
            config: self.config.transport.clone(),
            endpoints,
            connector: Arc::clone(&self.connector),
            updates: self.updates.clone(),
        });

        let snapshot = ConversationSession::new(conversation_id.clone(), owner);
        let writer = SnapshotWriter::spawn(self.state_store.clone(), conversation_id.clone());
        writer.push(snapshot.clone());

        info!(conversation_id = %conversation_id, transport_id = transport_id.0, "conversation opened");
        self.conversations.insert(
            conversation_id,
            LiveConversation {
                transport: transport.clone(),
                snapshot,
                correlator: ToolCallCorrelator::new(),
                writer,
                close_waiters: Vec::new(),
            },
        );
        transport
    }

    fn register_session(
        &mut self,
        session_id: DashboardSessionId,
    ) -> Result<mpsc::Receiver<DashboardEvent>, RelayError> {
        if self.sessions.contains(session_id) {
            return Err(RelayError::SessionExists { session_id });
        }
        let (sink, events) = mpsc::channel(self.config.session_buffer.max(1));
        self.sessions.register(session_id, sink);
        info!(session_id = %session_id, "dashboard session registered");
        Ok(events)
    }

    fn command(&mut self, session_id: DashboardSessionId, command: DashboardCommand) -> Result<(), RelayError> {
        if !self.sessions.contains(session_id) {
            return Err(RelayError::UnknownSession { session_id });
        }

        match command {
            DashboardCommand::Subscribe { conversation_id } => {
                self.sessions.subscribe(session_id, conversation_id.clone());
                let state = self
                    .conversations
                    .get(&conversation_id)
                    .map(|live| live.transport.state());
                self.sessions.send_to(
                    session_id,
                    DashboardEvent::SubscriptionAck {
                        conversation_id,
                        subscribed: true,
                        state,
                    },
                );
                Ok(())
            }
            DashboardCommand::Unsubscribe { conversation_id } => {
                self.sessions.unsubscribe(session_id, &conversation_id);
                self.sessions.send_to(
                    session_id,
                    DashboardEvent::SubscriptionAck {
                        conversation_id,
                        subscribed: false,
                        state: None,
                    },
                );
                Ok(())
            }
            DashboardCommand::SendMessage {
                conversation_id,
                text,
            } => {
                let live = self.addressed(session_id, &conversation_id)?;
                live.transport
                    .send(OutboundMessage::UserMessage { text })
                    .map_err(|error| RelayError::Transport {
                        conversation_id,
                        error,
                    })
            }
            DashboardCommand::InjectContext {
                conversation_id,
                text,
            } => {
                let live = self.addressed(session_id, &conversation_id)?;
                live.transport
                    .send(OutboundMessage::ContextualUpdate { text })
                    .map_err(|error| RelayError::Transport {
                        conversation_id,
                        error,
                    })
            }
            DashboardCommand::SubmitToolResult {
                conversation_id,
                correlation_id,
                payload,
                is_error,
            } => {
                let live = self.addressed(session_id, &conversation_id)?;
                let result = if is_error {
                    ToolResult::failure_with(payload)
                } else {
                    ToolResult::success(payload)
                };
                if !live.correlator.resolve(&correlation_id, result) {
                    debug!(
                        conversation_id = %conversation_id,
                        correlation_id = %correlation_id,
                        "tool result for a settled call discarded"
                    );
                }
                Ok(())
            }
        }
    }

    /// The live conversation a subscribed session is addressing.
    fn addressed(
        &self,
        session_id: DashboardSessionId,
        conversation_id: &ConversationId,
    ) -> Result<&LiveConversation, RelayError> {
        if !self.sessions.is_subscribed(session_id, conversation_id) {
            return Err(RelayError::NotSubscribed {
                session_id,
                conversation_id: conversation_id.clone(),
            });
        }
        self.conversations
            .get(conversation_id)
            .ok_or_else(|| RelayError::ConversationNotFound {
                conversation_id: conversation_id.clone(),
            })
    }

    fn on_transport_update(&mut self, update: TransportUpdate) {
        let TransportUpdate {
            conversation_id,
            transport_id,
            notice,
        } = update;

        let is_current = self
            .conversations
            .get(&conversation_id)
            .is_some_and(|live| live.transport.id() == transport_id);
        if !is_current {
            debug!(
                conversation_id = %conversation_id,
                transport_id = transport_id.0,
                "ignoring update from a retired transport"
            );
            return;
        }

        match notice {
            TransportNotice::Terminated(termination) => {
                if let Some(live) = self.conversations.remove(&conversation_id) {
                    self.retire(&conversation_id, live, &termination);
                }
            }
            TransportNotice::StateChanged(state) => {
                let Some(live) = self.conversations.get_mut(&conversation_id) else {
                    return;
                };
                live.snapshot.state = state;
                live.writer.push(live.snapshot.clone());

                let event = if state == ConnectionState::Connected {
                    DashboardEvent::ConversationOpened {
                        conversation_id: conversation_id.clone(),
                        state,
                    }
                } else {
                    DashboardEvent::ConversationEvent {
                        conversation_id: conversation_id.clone(),
                        event_type: "connection_state".to_string(),
                        payload: serde_json::json!({ "state": state }),
                    }
                };
                self.sessions.broadcast(&conversation_id, &event);
            }
            TransportNotice::Event(event) => {
                let Some(live) = self.conversations.get_mut(&conversation_id) else {
                    return;
                };
                live.snapshot.record_event(event.kind());
                if let DomainEvent::HandshakeMetadata {
                    upstream_conversation_id,
                } = &event
                {
                    live.snapshot.upstream_conversation_id = Some(upstream_conversation_id.clone());
                }
                live.writer.push(live.snapshot.clone());

                if let DomainEvent::ToolCallRequest {
                    correlation_id,
                    tool_name,
                    arguments,
                } = &event
                {
                    let request = ToolCallRequest::new(correlation_id.clone(), tool_name.clone(), arguments.clone());
                    start_tool_call(&self.tools, self.config.tool_timeout, live, request);
                }

                let event = DashboardEvent::from_domain(conversation_id.clone(), &event);
                self.sessions.broadcast(&conversation_id, &event);
            }
        }
    }

    /// Records the final state, settles pending tool calls, and tells
    /// subscribers. The conversation must already be out of the registry.
    fn retire(&mut self, conversation_id: &ConversationId, live: LiveConversation, termination: &Termination) {
        let LiveConversation {
            mut snapshot,
            correlator,
            writer,
            close_waiters,
            ..
        } = live;

        snapshot.finish(termination.final_state(), termination.reason());
        let cancelled_tool_calls = correlator.cancel_all();

        // Waiters are released once the final snapshot is durable.
        let flushed = writer.finish(snapshot);
        let id = conversation_id.clone();
        self.flushing.retain(|flush| !flush.is_finished());
        self.flushing.push(tokio::spawn(async move {
            if let Err(e) = flushed.await {
                warn!(conversation_id = %id, error = %e, "final snapshot not written");
            }
            for waiter in close_waiters {
                let _ = waiter.send(true);
            }
        }));

        let delivered = self.sessions.broadcast(
            conversation_id,
            &DashboardEvent::ConversationClosed {
                conversation_id: conversation_id.clone(),
                reason: termination.reason().to_string(),
            },
        );
        info!(
            conversation_id = %conversation_id,
            reason = termination.reason(),
            cancelled_tool_calls,
            delivered,
            "conversation closed"
        );
    }

    fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        let termination = Termination::Closed {
            reason: "shutdown".to_string(),
        };
        let live: Vec<_> = self.conversations.drain().collect();
        for (conversation_id, conversation) in live {
            conversation.transport.close("shutdown");
            self.retire(&conversation_id, conversation, &termination);
        }
        self.sessions.clear();
        info!("relay hub shutting down");
        std::mem::take(&mut self.flushing)
    }
}

fn start_tool_call(
    tools: &Arc<ToolRegistry>,
    timeout: Duration,
    live: &LiveConversation,
    request: ToolCallRequest,
) {
    let pending = match live.correlator.register(&request, timeout) {
        Ok(pending) => pending,
        Err(e) => {
            warn!(error = %e, "ignoring duplicate tool call request");
            return;
        }
    };

    let correlation_id = request.correlation_id.clone();
    let transport = live.transport.clone();
    tokio::spawn(async move {
        let outcome = pending.wait().await;
        if let Some(reply) = outcome.into_reply(correlation_id.clone()) {
            // Not replayed after a reconnect: the upstream session that asked is gone.
            if let Err(e) = transport.send(reply) {
                warn!(correlation_id = %correlation_id, error = %e, "tool result not delivered upstream");
            }
        }
    });

    if tools.get(&request.tool_name).is_none() {
        debug!(tool_name = request.tool_name, "no local executor; awaiting a dashboard result");
        return;
    }

    let tools = Arc::clone(tools);
    let correlator = live.correlator.clone();
    tokio::spawn(async move {
        let result = tools.invoke(&request.tool_name, request.arguments).await;
        if !correlator.resolve(&request.correlation_id, result) {
            debug!(
                correlation_id = %request.correlation_id,
                "tool finished after its call was settled"
            );
        }
    });
}

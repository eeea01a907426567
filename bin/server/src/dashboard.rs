//! Dashboard WebSocket sessions.
//!
//! Each socket is one dashboard session: text frames carry JSON
//! `DashboardCommand`s in and `DashboardEvent`s out.

use crate::state::AppState;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use callrelay_core::DashboardSessionId;
use callrelay_relay::{DashboardCommand, DashboardEvent, RelayError, RelayHub};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn dashboard_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state.hub.clone()))
}

async fn run_session(socket: WebSocket, hub: RelayHub) {
    let session_id = DashboardSessionId::new();
    let mut events = match hub.register_session(session_id).await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "dashboard session rejected");
            return;
        }
    };
    info!(session_id = %session_id, "dashboard connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "failed to encode dashboard event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                debug!("dashboard socket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Err(RelayError::HubUnavailable) = handle_frame(&hub, session_id, text.as_str()).await {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "dashboard socket error");
                break;
            }
        }
    }

    // Removing the session drops its event sender, which ends the writer.
    if let Err(e) = hub.remove_session(session_id).await {
        debug!(error = %e, "dashboard session not removed");
    }
    if let Err(e) = writer.await {
        warn!(error = %e, "dashboard writer failed");
    }
    info!(session_id = %session_id, "dashboard disconnected");
}

/// Applies one inbound frame. Refusals are reported to the session by the
/// hub; only a stopped hub surfaces as an error here.
pub async fn handle_frame(hub: &RelayHub, session_id: DashboardSessionId, frame: &str) -> Result<(), RelayError> {
    let command = match DashboardCommand::parse(frame) {
        Ok(command) => command,
        Err(e) => {
            debug!(session_id = %session_id, error = %e, "malformed dashboard frame");
            hub.notify(session_id, DashboardEvent::from_error(&e)).await?;
            return Ok(());
        }
    };

    match hub.handle_command(session_id, command).await {
        Err(RelayError::HubUnavailable) => Err(RelayError::HubUnavailable),
        Ok(()) | Err(_) => Ok(()),
    }
}

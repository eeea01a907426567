//! HTTP routes: health, call triggers, snapshots, and the initiation webhook.

use crate::dashboard;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use callrelay_core::{ConnectionState, ConversationId, ConversationSession, CustomerId};
use callrelay_relay::{Initiation, OpenConversation};
use callrelay_store::InitiationResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/dashboard", get(dashboard::dashboard_socket))
        .route("/calls/{conversation_id}/start", post(start_call))
        .route("/calls/{conversation_id}/end", post(end_call))
        .route("/conversations/{conversation_id}", get(conversation))
        .route("/webhooks/conversation-initiation", post(conversation_initiation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn conversation_id(raw: String) -> Result<ConversationId, ApiError> {
    ConversationId::new(raw).map_err(|e| ApiError::InvalidId {
        field: "conversation_id",
        reason: e.to_string(),
    })
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.hub.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "live_conversations": stats.live_conversations,
                "dashboard_sessions": stats.dashboard_sessions,
            })),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        ),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartCall {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
}

#[derive(Debug, Serialize)]
pub struct CallStarted {
    pub conversation_id: ConversationId,
    pub state: ConnectionState,
    /// True when customer context missed its deadline.
    pub degraded: bool,
}

#[instrument(skip(state, body))]
async fn start_call(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    Json(body): Json<StartCall>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = conversation_id(raw_id)?;

    let (initiation, degraded) = match &body.customer_id {
        Some(customer_id) => {
            let response = state
                .assembler
                .respond_within(customer_id, state.webhook_deadline)
                .await;
            let first_message = state.first_message.clone().unwrap_or(response.greeting);
            let initiation = Initiation {
                agent_config: json!({ "agent": { "first_message": first_message } }),
                dynamic_variables: response.dynamic_variables,
            };
            (initiation, response.degraded)
        }
        None => {
            let agent_config = match &state.first_message {
                Some(first_message) => json!({ "agent": { "first_message": first_message } }),
                None => json!({}),
            };
            let initiation = Initiation {
                agent_config,
                ..Initiation::default()
            };
            (initiation, false)
        }
    };

    let transport = state
        .hub
        .open_conversation(
            OpenConversation {
                conversation_id: conversation_id.clone(),
                owner: body.customer_id,
                initiation,
            },
            Arc::clone(&state.endpoints),
        )
        .await?;

    info!(conversation_id = %conversation_id, "call started");
    Ok((
        StatusCode::ACCEPTED,
        Json(CallStarted {
            conversation_id,
            state: transport.state(),
            degraded,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct EndCall {
    #[serde(default)]
    pub reason: Option<String>,
}

#[instrument(skip(state, body))]
async fn end_call(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    Json(body): Json<EndCall>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = conversation_id(raw_id)?;
    let reason = body.reason.unwrap_or_else(|| "call_ended".to_string());

    if !state.hub.close_conversation(conversation_id.clone(), reason).await? {
        return Err(ApiError::ConversationNotFound {
            conversation_id: conversation_id.to_string(),
        });
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "conversation_id": conversation_id }))))
}

async fn conversation(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<ConversationSession>, ApiError> {
    let conversation_id = conversation_id(raw_id)?;
    state
        .hub
        .conversation_snapshot(conversation_id.clone())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::ConversationNotFound {
            conversation_id: conversation_id.to_string(),
        })
}

#[derive(Debug, Deserialize)]
pub struct InitiationRequest {
    pub customer_id: CustomerId,
}

async fn conversation_initiation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitiationRequest>,
) -> Json<InitiationResponse> {
    Json(
        state
            .assembler
            .respond_within(&request.customer_id, state.webhook_deadline)
            .await,
    )
}

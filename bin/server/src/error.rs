//! Error types for the HTTP surface and process bootstrap.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use callrelay_relay::RelayError;
use std::fmt;

/// Errors returned by HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// A path or body identifier was rejected.
    InvalidId { field: &'static str, reason: String },
    /// No live or persisted conversation with this id.
    ConversationNotFound { conversation_id: String },
    /// The relay hub has stopped.
    Unavailable,
    /// Any other relay failure.
    Relay(RelayError),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidId { field, reason } => write!(f, "invalid {field}: {reason}"),
            Self::ConversationNotFound { conversation_id } => {
                write!(f, "conversation '{conversation_id}' not found")
            }
            Self::Unavailable => write!(f, "relay unavailable"),
            Self::Relay(e) => write!(f, "relay error: {e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::HubUnavailable => Self::Unavailable,
            RelayError::ConversationNotFound { conversation_id } => Self::ConversationNotFound {
                conversation_id: conversation_id.to_string(),
            },
            other => Self::Relay(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::InvalidId { .. } => (StatusCode::BAD_REQUEST, "invalid_id"),
            Self::ConversationNotFound { .. } => (StatusCode::NOT_FOUND, "conversation_not_found"),
            Self::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "hub_unavailable"),
            Self::Relay(e) => {
                tracing::error!(error = %e, "relay request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.code())
            }
        };

        let body = serde_json::json!({ "error": code, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Errors that stop the server from starting.
#[derive(Debug)]
pub enum BootstrapError {
    InvalidTenant { reason: String },
    HttpClient { details: String },
    Bind { addr: String, details: String },
    Serve { details: String },
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTenant { reason } => write!(f, "invalid tenant: {reason}"),
            Self::HttpClient { details } => write!(f, "failed to build HTTP client: {details}"),
            Self::Bind { addr, details } => write!(f, "failed to bind {addr}: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for BootstrapError {}

//! HTTP and WebSocket surface for callrelay.
//!
//! Routes:
//! - `GET /health`
//! - `GET /ws/dashboard` (one WebSocket per dashboard session)
//! - `POST /calls/{conversation_id}/start` and `/end`
//! - `GET /conversations/{conversation_id}`
//! - `POST /webhooks/conversation-initiation`

pub mod config;
pub mod context;
pub mod dashboard;
pub mod error;
pub mod routes;
pub mod state;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

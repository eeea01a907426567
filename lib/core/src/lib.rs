//! Core domain types for callrelay.
//!
//! This crate provides the identifiers, conversation snapshots, and error
//! handling shared by the store, relay, and server crates.

pub mod conversation;
pub mod error;
pub mod id;

pub use conversation::{ConnectionState, ConversationSession, LastEvent};
pub use error::Result;
pub use id::{ConversationId, CorrelationId, CustomerId, DashboardSessionId, ParseIdError, TenantId};

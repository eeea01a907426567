//! Conversation state persistence and context caching for callrelay.
//!
//! This crate provides:
//!
//! - **Backends**: the `KeyValueStore` trait with in-memory and NATS
//!   JetStream KV implementations
//! - **State Store**: TTL-bounded conversation snapshots that degrade to
//!   "not found" when the backend is down
//! - **Context Cache**: read-through cache that is observably identical to
//!   no cache at all, apart from latency
//! - **Customer Context**: deadline-bounded assembly of caller context and
//!   greeting for the call-initiation webhook

pub mod backend;
pub mod cache;
pub mod customer;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod nats;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::KeyValueStore;
pub use cache::{CacheStatus, ContextCache};
pub use customer::{
    AssemblerConfig, BusinessFacts, ContextAssembler, ContextSource, CustomerContext,
    CustomerProfile, InitiationResponse, InteractionSummary,
};
pub use envelope::Envelope;
pub use error::{ContextSourceError, StoreError};
pub use memory::InMemoryStore;
pub use nats::{NatsConfig, NatsKvStore};
pub use state::ConversationStateStore;

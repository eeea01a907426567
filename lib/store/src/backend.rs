//! Key-value backend abstraction.
//!
//! The state store and the context cache only need independent reads and
//! writes of opaque bytes with a time-to-live. This trait lets them run
//! against NATS JetStream in production and an in-process map in tests or
//! when no external store is configured.

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for TTL-bounded key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key` for at most `ttl`.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Removes `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

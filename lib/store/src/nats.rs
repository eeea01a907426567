//! NATS JetStream key-value backend.
//!
//! Conversation snapshots and cached context live in a single JetStream KV
//! bucket. The bucket's `max_age` bounds every entry; shorter per-key TTLs
//! are enforced by the expiring envelope on read.

use crate::backend::KeyValueStore;
use crate::error::StoreError;
use async_nats::jetstream;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::info;

/// Default bucket name.
const DEFAULT_BUCKET_NAME: &str = "callrelay";

/// Default bucket-wide maximum age (the conversation snapshot TTL).
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the NATS key-value backend.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Bucket name (defaults to `callrelay`).
    pub bucket_name: Option<String>,
    /// Upper bound on any entry's lifetime (defaults to 24h).
    pub max_age: Option<Duration>,
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bucket_name: None,
            max_age: None,
        }
    }

    fn bucket(&self) -> &str {
        self.bucket_name.as_deref().unwrap_or(DEFAULT_BUCKET_NAME)
    }

    fn max_age(&self) -> Duration {
        self.max_age.unwrap_or(DEFAULT_MAX_AGE)
    }
}

/// JetStream KV-backed store.
pub struct NatsKvStore {
    store: kv::Store,
}

impl NatsKvStore {
    /// Connects to NATS and opens (or creates) the bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or bucket setup fails.
    pub async fn connect(config: &NatsConfig) -> Result<Self, Report<StoreError>> {
        let client =
            async_nats::connect(&config.url)
                .await
                .map_err(|e| StoreError::Unavailable {
                    message: format!("failed to connect to {}: {e}", config.url),
                })?;

        let jetstream = jetstream::new(client);

        let store = jetstream
            .create_key_value(kv::Config {
                bucket: config.bucket().to_string(),
                history: 1,
                max_age: config.max_age(),
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("failed to open bucket {}: {e}", config.bucket()),
            })?;

        info!(bucket = config.bucket(), "connected to NATS key-value bucket");

        Ok(Self { store })
    }

    /// Maps a logical key such as `conversation:acme:conv1` onto the NATS
    /// key alphabet (`[-/_=.a-zA-Z0-9]`, no empty tokens).
    ///
    /// Separators become `.`; every other byte outside the alphabet, and `=`
    /// itself, is escaped as `=XX`, so distinct logical keys never collide.
    fn encode_key(key: &str) -> String {
        let bytes = key.as_bytes();
        let mut encoded = String::with_capacity(key.len());

        for (i, &b) in bytes.iter().enumerate() {
            match b {
                b':' => {
                    let empty_token = i == 0 || i + 1 == bytes.len() || bytes[i - 1] == b':';
                    if empty_token {
                        encoded.push_str("=3A");
                    } else {
                        encoded.push('.');
                    }
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'/' => {
                    encoded.push(char::from(b));
                }
                _ => {
                    let _ = write!(encoded, "={b:02X}");
                }
            }
        }

        encoded
    }
}

#[async_trait]
impl KeyValueStore for NatsKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .store
            .get(Self::encode_key(key))
            .await
            .map_err(|e| StoreError::ReadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(value.map(|bytes| bytes.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> Result<(), StoreError> {
        self.store
            .put(Self::encode_key(key), value.into())
            .await
            .map_err(|e| StoreError::WriteFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store
            .delete(Self::encode_key(key))
            .await
            .map_err(|e| StoreError::DeleteFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}

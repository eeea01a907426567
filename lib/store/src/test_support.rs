//! Fakes shared by this crate's tests.

use crate::backend::KeyValueStore;
use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Backend that fails every call, as if the store were unreachable.
pub(crate) struct DownStore;

impl DownStore {
    fn error() -> StoreError {
        StoreError::Unavailable {
            message: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl KeyValueStore for DownStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(Self::error())
    }

    async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), StoreError> {
        Err(Self::error())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(Self::error())
    }
}

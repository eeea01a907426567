//! Read-through cache for expensive per-customer context.
//!
//! The cache is an accelerator only. A hit returns exactly what the builder
//! produced when the entry was written; a miss, an expired entry, an
//! undecodable entry, or an unreachable backend all fall through to the
//! builder. A `ContextCache` without a backend never caches at all and is
//! observably identical apart from latency.

use crate::backend::KeyValueStore;
use crate::envelope::Envelope;
use callrelay_core::TenantId;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where a `get_or_build` result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh cache entry.
    Hit,
    /// Built and written back.
    Miss,
    /// Built without consulting the cache (no backend, or backend failed).
    Bypass,
}

impl CacheStatus {
    /// Returns the lowercase name used in logs and responses.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

/// Cache-aside store keyed `context:{tenant}:{key}`.
#[derive(Clone)]
pub struct ContextCache {
    backend: Option<Arc<dyn KeyValueStore>>,
    tenant: TenantId,
}

impl ContextCache {
    /// Creates a cache over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>, tenant: TenantId) -> Self {
        Self {
            backend: Some(backend),
            tenant,
        }
    }

    /// Creates a cache that always invokes the builder.
    #[must_use]
    pub fn disabled(tenant: TenantId) -> Self {
        Self {
            backend: None,
            tenant,
        }
    }

    /// Returns the storage key for a context id.
    #[must_use]
    pub fn key(&self, key: &str) -> String {
        format!("context:{}:{}", self.tenant, key)
    }

    /// Returns the cached value for `key`, or builds, stores, and returns it.
    ///
    /// # Errors
    ///
    /// Returns the builder's error unchanged. Errors are never cached.
    pub async fn get_or_build<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        builder: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_build_with_status(key, ttl, builder)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`Self::get_or_build`], also reporting whether the cache served it.
    ///
    /// # Errors
    ///
    /// Returns the builder's error unchanged.
    pub async fn get_or_build_with_status<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        builder: F,
    ) -> Result<(T, CacheStatus), E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(backend) = &self.backend else {
            return builder().await.map(|value| (value, CacheStatus::Bypass));
        };

        let full_key = self.key(key);
        let mut status = CacheStatus::Miss;

        match backend.get(&full_key).await {
            Ok(Some(bytes)) => match Envelope::<T>::open(&bytes, Utc::now()) {
                Ok(Some(value)) => {
                    debug!(key = full_key, "context cache hit");
                    return Ok((value, CacheStatus::Hit));
                }
                Ok(None) => debug!(key = full_key, "context cache entry expired"),
                Err(e) => warn!(key = full_key, error = %e, "context cache entry undecodable"),
            },
            Ok(None) => debug!(key = full_key, "context cache miss"),
            Err(e) => {
                warn!(key = full_key, error = %e, "context cache unavailable; building uncached");
                status = CacheStatus::Bypass;
            }
        }

        let value = builder().await?;

        if status == CacheStatus::Miss {
            match Envelope::new(&value, ttl).to_json_bytes() {
                Ok(bytes) => {
                    if let Err(e) = backend.put(&full_key, bytes, ttl).await {
                        warn!(key = full_key, error = %e, "context cache write failed");
                    }
                }
                Err(e) => warn!(key = full_key, error = %e, "context value not cacheable"),
            }
        }

        Ok((value, status))
    }

    /// Drops a cached entry. Failures are logged; the entry then ages out
    /// through its TTL.
    pub async fn invalidate(&self, key: &str) {
        let Some(backend) = &self.backend else {
            return;
        };

        let full_key = self.key(key);
        if let Err(e) = backend.delete(&full_key).await {
            warn!(key = full_key, error = %e, "context cache invalidation failed; entry will expire");
        }
    }
}

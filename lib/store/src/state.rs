//! Best-effort persistence of conversation snapshots.
//!
//! Snapshots let a reconnecting dashboard, or a restarted process, recover
//! what recently happened on a conversation. Persistence is not a
//! correctness requirement: every operation tolerates an unavailable
//! backend by logging and degrading to "not found" or a no-op.

use crate::backend::KeyValueStore;
use crate::envelope::Envelope;
use callrelay_core::{ConversationId, ConversationSession, TenantId};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default snapshot lifetime.
pub const DEFAULT_CONVERSATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// TTL-bounded store of `ConversationSession` snapshots.
#[derive(Clone)]
pub struct ConversationStateStore {
    backend: Arc<dyn KeyValueStore>,
    tenant: TenantId,
    default_ttl: Duration,
}

impl ConversationStateStore {
    /// Creates a store for one tenant.
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>, tenant: TenantId) -> Self {
        Self {
            backend,
            tenant,
            default_ttl: DEFAULT_CONVERSATION_TTL,
        }
    }

    /// Overrides the TTL used by [`Self::put_default`].
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Returns the TTL used by [`Self::put_default`].
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the storage key, `conversation:{tenant}:{conversationId}`.
    #[must_use]
    pub fn key(&self, conversation_id: &ConversationId) -> String {
        format!("conversation:{}:{}", self.tenant, conversation_id)
    }

    /// Persists a snapshot for `ttl`. Failures are logged and swallowed.
    pub async fn put(
        &self,
        conversation_id: &ConversationId,
        snapshot: &ConversationSession,
        ttl: Duration,
    ) {
        let key = self.key(conversation_id);
        let bytes = match Envelope::new(snapshot, ttl).to_json_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "failed to encode conversation snapshot");
                return;
            }
        };

        if let Err(e) = self.backend.put(&key, bytes, ttl).await {
            warn!(key, error = %e, "conversation snapshot not persisted");
        }
    }

    /// Persists a snapshot with the default TTL.
    pub async fn put_default(
        &self,
        conversation_id: &ConversationId,
        snapshot: &ConversationSession,
    ) {
        self.put(conversation_id, snapshot, self.default_ttl).await;
    }

    /// Loads a snapshot. Backend failures and undecodable or expired
    /// values all read as `None`.
    pub async fn get(&self, conversation_id: &ConversationId) -> Option<ConversationSession> {
        let key = self.key(conversation_id);
        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "conversation snapshot read failed; treating as absent");
                return None;
            }
        };

        match Envelope::<ConversationSession>::open(&bytes, Utc::now()) {
            Ok(snapshot) => {
                if snapshot.is_none() {
                    debug!(key, "conversation snapshot expired");
                }
                snapshot
            }
            Err(e) => {
                warn!(key, error = %e, "conversation snapshot undecodable; treating as absent");
                None
            }
        }
    }

    /// Removes a snapshot. Failures are logged and swallowed.
    pub async fn delete(&self, conversation_id: &ConversationId) {
        let key = self.key(conversation_id);
        if let Err(e) = self.backend.delete(&key).await {
            warn!(key, error = %e, "conversation snapshot not deleted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::test_support::DownStore;
    use callrelay_core::ConnectionState;

    fn tenant() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    fn conv(id: &str) -> ConversationId {
        ConversationId::new(id).unwrap()
    }

    #[test]
    fn key_layout() {
        let store = ConversationStateStore::new(Arc::new(InMemoryStore::new()), tenant());
        assert_eq!(store.key(&conv("conv1")), "conversation:acme:conv1");
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = ConversationStateStore::new(Arc::new(InMemoryStore::new()), tenant());
        let id = conv("conv1");
        let mut snapshot = ConversationSession::new(id.clone(), None);
        snapshot.state = ConnectionState::Connected;

        store.put(&id, &snapshot, Duration::from_secs(60)).await;
        assert_eq!(store.get(&id).await, Some(snapshot));

        store.delete(&id).await;
        assert_eq!(store.get(&id).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_disappears_after_ttl() {
        let store = ConversationStateStore::new(Arc::new(InMemoryStore::new()), tenant());
        let id = conv("conv1");
        let snapshot = ConversationSession::new(id.clone(), None);

        store.put(&id, &snapshot, Duration::from_secs(30)).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(store.get(&id).await, None);
    }

    #[tokio::test]
    async fn unavailable_backend_degrades_silently() {
        let store = ConversationStateStore::new(Arc::new(DownStore), tenant());
        let id = conv("conv1");
        let snapshot = ConversationSession::new(id.clone(), None);

        store.put_default(&id, &snapshot).await;
        assert_eq!(store.get(&id).await, None);
        store.delete(&id).await;
    }

    #[tokio::test]
    async fn corrupt_value_reads_as_absent() {
        let backend = Arc::new(InMemoryStore::new());
        let store = ConversationStateStore::new(backend.clone(), tenant());
        let id = conv("conv1");

        backend
            .put(&store.key(&id), b"{not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get(&id).await, None);
    }

    #[tokio::test]
    async fn tenants_do_not_share_keys() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let acme = ConversationStateStore::new(backend.clone(), tenant());
        let other = ConversationStateStore::new(backend, TenantId::new("globex").unwrap());
        let id = conv("conv1");

        acme.put_default(&id, &ConversationSession::new(id.clone(), None))
            .await;

        assert!(acme.get(&id).await.is_some());
        assert!(other.get(&id).await.is_none());
    }
}

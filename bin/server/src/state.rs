//! Shared application state and its construction from configuration.

use crate::config::ServerConfig;
use crate::context::HttpContextSource;
use crate::error::BootstrapError;
use crate::tools::default_registry;
use callrelay_core::TenantId;
use callrelay_relay::{EndpointProvider, RelayHub, SignedUrlProvider, WebSocketConnector};
use callrelay_store::{
    ContextAssembler, ContextCache, ConversationStateStore, InMemoryStore, KeyValueStore, NatsKvStore,
};
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared application state.
pub struct AppState {
    pub hub: RelayHub,
    pub assembler: ContextAssembler,
    /// Issues a fresh upstream URL for every connection attempt.
    pub endpoints: Arc<dyn EndpointProvider>,
    /// Replaces the context-derived greeting when set.
    pub first_message: Option<String>,
    pub webhook_deadline: Duration,
}

/// The selected storage backend.
pub struct Backend {
    pub store: Arc<dyn KeyValueStore>,
    /// Set when running in memory, so expired entries can be purged.
    pub memory: Option<Arc<InMemoryStore>>,
}

/// Connects to NATS when configured, otherwise falls back to memory.
pub async fn select_backend(config: &ServerConfig) -> Backend {
    if let Some(nats) = config.nats.backend_config(config.cache.conversation_ttl()) {
        match NatsKvStore::connect(&nats).await {
            Ok(store) => {
                return Backend {
                    store: Arc::new(store),
                    memory: None,
                };
            }
            Err(report) => {
                warn!(error = %report, "NATS unavailable; using in-memory storage");
            }
        }
    } else {
        warn!("no NATS URL configured; using in-memory storage");
    }

    let memory = Arc::new(InMemoryStore::new());
    Backend {
        store: memory.clone(),
        memory: Some(memory),
    }
}

impl AppState {
    /// Wires the hub, context assembler, and upstream endpoint provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is invalid or the HTTP client cannot
    /// be built.
    pub fn build(config: &ServerConfig, backend: Arc<dyn KeyValueStore>) -> Result<Self, Report<BootstrapError>> {
        let tenant = TenantId::new(config.tenant.as_str()).map_err(|e| BootstrapError::InvalidTenant {
            reason: e.to_string(),
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BootstrapError::HttpClient {
                details: e.to_string(),
            })?;

        let assembler = ContextAssembler::new(
            ContextCache::new(backend.clone(), tenant.clone()),
            Arc::new(HttpContextSource::new(http.clone(), config.context.base_url.as_str())),
            config.cache.assembler_config(&config.context.business_name),
        );

        let state_store =
            ConversationStateStore::new(backend, tenant).with_default_ttl(config.cache.conversation_ttl());
        let hub = RelayHub::spawn(
            config.relay.hub_config(),
            Arc::new(WebSocketConnector::default()),
            state_store,
            default_registry(assembler.clone()),
        );

        info!(tenant = %config.tenant, "relay hub ready");

        Ok(Self {
            hub,
            assembler,
            endpoints: Arc::new(SignedUrlProvider::new(http, config.upstream.signed_url_config())),
            first_message: config.upstream.first_message.clone(),
            webhook_deadline: config.cache.webhook_deadline(),
        })
    }
}

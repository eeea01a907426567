//! Fakes for route and session tests.

use crate::state::AppState;
use crate::tools::default_registry;
use async_trait::async_trait;
use callrelay_core::{ConversationId, CustomerId, TenantId};
use callrelay_relay::{
    ConnectError, Endpoint, EndpointProvider, HubConfig, LinkCommand, LinkEvent, RelayHub, UpstreamConnector,
    UpstreamLink,
};
use callrelay_store::{
    AssemblerConfig, BusinessFacts, ContextAssembler, ContextCache, ContextSource, ContextSourceError,
    ConversationStateStore, CustomerProfile, InMemoryStore, InteractionSummary,
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Context source with canned answers.
pub(crate) struct StaticSource {
    delay: Option<Duration>,
}

impl StaticSource {
    pub(crate) fn known() -> Arc<Self> {
        Arc::new(Self { delay: None })
    }

    /// Answers only after far longer than any webhook deadline.
    pub(crate) fn slow() -> Arc<Self> {
        Arc::new(Self {
            delay: Some(Duration::from_secs(5)),
        })
    }

    async fn wait(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ContextSource for StaticSource {
    async fn customer_profile(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerProfile>, ContextSourceError> {
        self.wait().await;
        Ok(Some(CustomerProfile {
            customer_id: customer_id.clone(),
            first_name: Some("Dana".to_string()),
            last_name: Some("Reyes".to_string()),
            phone: None,
            notes: None,
        }))
    }

    async fn recent_interactions(
        &self,
        _customer_id: &CustomerId,
        _limit: usize,
    ) -> Result<Vec<InteractionSummary>, ContextSourceError> {
        self.wait().await;
        Ok(vec![InteractionSummary {
            channel: "sms".to_string(),
            occurred_at: Utc::now(),
            summary: "Asked about trail boots".to_string(),
        }])
    }

    async fn business_facts(&self) -> Result<BusinessFacts, ContextSourceError> {
        self.wait().await;
        Ok(BusinessFacts {
            business_name: "Acme Outfitters".to_string(),
            ..BusinessFacts::default()
        })
    }
}

pub(crate) fn assembler(source: Arc<dyn ContextSource>) -> ContextAssembler {
    ContextAssembler::new(
        ContextCache::disabled(TenantId::new("acme").unwrap()),
        source,
        AssemblerConfig {
            fallback_business_name: "Acme Outfitters".to_string(),
            ..AssemblerConfig::default()
        },
    )
}

/// Accepts every connection and keeps it open without ever answering.
#[derive(Default)]
pub(crate) struct SilentUpstream {
    links: Mutex<Vec<(mpsc::Receiver<LinkCommand>, mpsc::Sender<LinkEvent>)>>,
}

#[async_trait]
impl UpstreamConnector for SilentUpstream {
    async fn connect(&self, _endpoint: Endpoint) -> Result<UpstreamLink, ConnectError> {
        let (outbound, commands) = mpsc::channel(64);
        let (events, inbound) = mpsc::channel(64);
        self.links
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((commands, events));
        Ok(UpstreamLink { outbound, inbound })
    }
}

pub(crate) struct FixedEndpoints;

#[async_trait]
impl EndpointProvider for FixedEndpoints {
    async fn issue(&self, conversation_id: &ConversationId) -> Result<Endpoint, ConnectError> {
        Ok(Endpoint::new(format!("wss://upstream.test/{conversation_id}")))
    }
}

pub(crate) fn test_state(source: Arc<dyn ContextSource>) -> Arc<AppState> {
    let assembler = assembler(source);
    let store = ConversationStateStore::new(Arc::new(InMemoryStore::new()), TenantId::new("acme").unwrap());
    let hub = RelayHub::spawn(
        HubConfig::default(),
        Arc::new(SilentUpstream::default()),
        store,
        default_registry(assembler.clone()),
    );

    Arc::new(AppState {
        hub,
        assembler,
        endpoints: Arc::new(FixedEndpoints),
        first_message: None,
        webhook_deadline: Duration::from_millis(100),
    })
}

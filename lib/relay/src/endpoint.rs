//! Signed-URL endpoint provider.
//!
//! The upstream agent service authenticates a WebSocket by a short-lived
//! signed URL. A fresh URL is requested for every connection attempt.

use crate::error::ConnectError;
use crate::link::{Endpoint, EndpointProvider};
use async_trait::async_trait;
use callrelay_core::ConversationId;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Settings for [`SignedUrlProvider`].
#[derive(Debug, Clone)]
pub struct SignedUrlConfig {
    /// HTTPS endpoint that returns `{"signed_url": "..."}`.
    pub endpoint: String,
    pub agent_id: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// Requests a signed WebSocket URL from the upstream agent service.
#[derive(Debug, Clone)]
pub struct SignedUrlProvider {
    client: reqwest::Client,
    config: SignedUrlConfig,
}

impl SignedUrlProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, config: SignedUrlConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl EndpointProvider for SignedUrlProvider {
    async fn issue(&self, conversation_id: &ConversationId) -> Result<Endpoint, ConnectError> {
        let unavailable = |message: String| ConnectError::EndpointUnavailable { message };

        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[("agent_id", self.config.agent_id.as_str())])
            .header("x-api-key", &self.config.api_key)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| unavailable(e.to_string()))?;

        let body: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("unexpected signed url response: {e}")))?;

        debug!(conversation_id = %conversation_id, "issued upstream endpoint");
        Ok(Endpoint::new(body.signed_url))
    }
}

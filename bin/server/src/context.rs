//! HTTP client for the customer data service.

use async_trait::async_trait;
use callrelay_core::CustomerId;
use callrelay_store::{BusinessFacts, ContextSource, ContextSourceError, CustomerProfile, InteractionSummary};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Loads customer context from `{base_url}/customers/...` and
/// `{base_url}/business`.
#[derive(Debug, Clone)]
pub struct HttpContextSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpContextSource {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// GETs `path`, returning `None` on 404.
    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, ContextSourceError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| ContextSourceError::Unavailable {
                message: format!("{url}: {e}"),
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(url, "context source has no record");
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .map_err(|e| ContextSourceError::Unavailable {
                message: e.to_string(),
            })?;

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| ContextSourceError::InvalidResponse {
                message: format!("{url}: {e}"),
            })
    }
}

#[async_trait]
impl ContextSource for HttpContextSource {
    async fn customer_profile(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerProfile>, ContextSourceError> {
        self.fetch(&format!("/customers/{customer_id}"), &[]).await
    }

    async fn recent_interactions(
        &self,
        customer_id: &CustomerId,
        limit: usize,
    ) -> Result<Vec<InteractionSummary>, ContextSourceError> {
        let interactions = self
            .fetch::<Vec<InteractionSummary>>(
                &format!("/customers/{customer_id}/interactions"),
                &[("limit", limit.to_string())],
            )
            .await?
            .unwrap_or_default();
        Ok(interactions.into_iter().take(limit).collect())
    }

    async fn business_facts(&self) -> Result<BusinessFacts, ContextSourceError> {
        Ok(self.fetch("/business", &[]).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let source = HttpContextSource::new(reqwest::Client::new(), "http://crm.internal/api/");
        assert_eq!(source.url("/business"), "http://crm.internal/api/business");
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let source = HttpContextSource::new(reqwest::Client::new(), "http://127.0.0.1:1");
        let err = source.business_facts().await.unwrap_err();
        assert!(matches!(err, ContextSourceError::Unavailable { .. }));
    }
}

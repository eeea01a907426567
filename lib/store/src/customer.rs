//! Customer context assembly for the call-initiation webhook.
//!
//! When a call comes in, the upstream service asks for the caller's context
//! and an opening line, and it only waits a short time for the answer. The
//! assembler gathers the profile, recent interactions, and business facts
//! through the cache and always answers inside the deadline, falling back
//! to a generic greeting when the context cannot be produced in time.

use crate::cache::{CacheStatus, ContextCache};
use crate::error::ContextSourceError;
use async_trait::async_trait;
use callrelay_core::CustomerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, instrument, warn};

/// A customer's profile as known to the business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    /// Customer identifier.
    pub customer_id: CustomerId,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Phone number in E.164 form.
    pub phone: Option<String>,
    /// Free-form notes from staff.
    pub notes: Option<String>,
}

impl CustomerProfile {
    /// Returns "first last", whichever parts are present.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// Summary of one earlier interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionSummary {
    /// Channel, e.g. `voice` or `sms`.
    pub channel: String,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
    /// One-line summary.
    pub summary: String,
}

/// Facts about the business the agent may mention.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusinessFacts {
    /// Business display name.
    pub business_name: String,
    /// Opening hours, human readable.
    pub hours: Option<String>,
    /// Additional key/value facts (address, return policy, ...).
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
}

/// Everything the agent knows about a caller at the start of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContext {
    /// Profile, if the customer is known.
    pub profile: Option<CustomerProfile>,
    /// Most recent interactions, newest first.
    pub recent_interactions: Vec<InteractionSummary>,
    /// Business facts.
    pub business_facts: BusinessFacts,
}

/// External source of customer data.
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Loads a customer's profile.
    async fn customer_profile(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerProfile>, ContextSourceError>;

    /// Loads up to `limit` recent interactions, newest first.
    async fn recent_interactions(
        &self,
        customer_id: &CustomerId,
        limit: usize,
    ) -> Result<Vec<InteractionSummary>, ContextSourceError>;

    /// Loads the business facts.
    async fn business_facts(&self) -> Result<BusinessFacts, ContextSourceError>;
}

/// Tuning for context assembly.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// How long assembled context stays cached.
    pub ttl: Duration,
    /// How many recent interactions to include.
    pub history_limit: usize,
    /// Business name used when no facts could be loaded.
    pub fallback_business_name: String,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            history_limit: 5,
            fallback_business_name: "our store".to_string(),
        }
    }
}

/// Answer to a call-initiation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiationResponse {
    /// The customer the request was about.
    pub customer_id: CustomerId,
    /// Assembled context, absent when degraded.
    pub context: Option<CustomerContext>,
    /// Opening line for the agent.
    pub greeting: String,
    /// Variables substituted into the agent's prompt.
    pub dynamic_variables: BTreeMap<String, String>,
    /// True when the context could not be produced in time.
    pub degraded: bool,
    /// `hit`, `miss`, `bypass`, or `none` when degraded.
    pub cache: String,
}

/// Builds `CustomerContext` through the cache.
#[derive(Clone)]
pub struct ContextAssembler {
    cache: ContextCache,
    source: Arc<dyn ContextSource>,
    config: AssemblerConfig,
}

impl ContextAssembler {
    /// Creates an assembler.
    #[must_use]
    pub fn new(cache: ContextCache, source: Arc<dyn ContextSource>, config: AssemblerConfig) -> Self {
        Self {
            cache,
            source,
            config,
        }
    }

    /// Returns the customer's context, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails on a cache miss.
    pub async fn assemble(
        &self,
        customer_id: &CustomerId,
    ) -> Result<(CustomerContext, CacheStatus), ContextSourceError> {
        let source = Arc::clone(&self.source);
        let limit = self.config.history_limit;

        self.cache
            .get_or_build_with_status(customer_id.as_str(), self.config.ttl, || async move {
                let (profile, recent_interactions, business_facts) = tokio::try_join!(
                    source.customer_profile(customer_id),
                    source.recent_interactions(customer_id, limit),
                    source.business_facts(),
                )?;

                Ok::<_, ContextSourceError>(CustomerContext {
                    profile,
                    recent_interactions,
                    business_facts,
                })
            })
            .await
    }

    /// Answers an initiation request, never taking longer than `deadline`.
    ///
    /// The build runs in its own task. When it misses the deadline it keeps
    /// going and fills the cache for the next call.
    #[instrument(skip_all, fields(customer_id = %customer_id))]
    pub async fn respond_within(
        &self,
        customer_id: &CustomerId,
        deadline: Duration,
    ) -> InitiationResponse {
        let assembler = self.clone();
        let build_id = customer_id.clone();
        let build = tokio::spawn(
            async move { assembler.assemble(&build_id).await }.in_current_span(),
        );

        match tokio::time::timeout(deadline, build).await {
            Ok(Ok(Ok((context, status)))) => InitiationResponse {
                customer_id: customer_id.clone(),
                greeting: greeting(Some(&context), &self.config.fallback_business_name),
                dynamic_variables: dynamic_variables(
                    customer_id,
                    Some(&context),
                    &self.config.fallback_business_name,
                ),
                context: Some(context),
                degraded: false,
                cache: status.as_str().to_string(),
            },
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "context assembly failed; answering with generic greeting");
                self.degraded(customer_id)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "context assembly task failed");
                self.degraded(customer_id)
            }
            Err(_) => {
                warn!(
                    deadline_ms = deadline.as_millis(),
                    "context assembly missed deadline; finishing in background"
                );
                self.degraded(customer_id)
            }
        }
    }

    /// Drops the cached context for a customer whose data changed.
    pub async fn invalidate(&self, customer_id: &CustomerId) {
        self.cache.invalidate(customer_id.as_str()).await;
    }

    fn degraded(&self, customer_id: &CustomerId) -> InitiationResponse {
        InitiationResponse {
            customer_id: customer_id.clone(),
            context: None,
            greeting: greeting(None, &self.config.fallback_business_name),
            dynamic_variables: dynamic_variables(
                customer_id,
                None,
                &self.config.fallback_business_name,
            ),
            degraded: true,
            cache: "none".to_string(),
        }
    }
}

fn business_name<'a>(context: Option<&'a CustomerContext>, fallback: &'a str) -> &'a str {
    context
        .map(|c| c.business_facts.business_name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback)
}

/// Chooses the agent's opening line.
#[must_use]
pub fn greeting(context: Option<&CustomerContext>, fallback_business_name: &str) -> String {
    let business = business_name(context, fallback_business_name);
    let first_name = context
        .and_then(|c| c.profile.as_ref())
        .and_then(|p| p.first_name.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty());

    match (first_name, context) {
        (Some(name), Some(c)) if !c.recent_interactions.is_empty() => {
            format!("Welcome back, {name}! Thanks for calling {business}. How can I help you today?")
        }
        (Some(name), _) => {
            format!("Hi {name}, thanks for calling {business}! How can I help you today?")
        }
        (None, _) => format!("Thanks for calling {business}! How can I help you today?"),
    }
}

/// Builds the prompt variables for the agent.
#[must_use]
pub fn dynamic_variables(
    customer_id: &CustomerId,
    context: Option<&CustomerContext>,
    fallback_business_name: &str,
) -> BTreeMap<String, String> {
    let customer_name = context
        .and_then(|c| c.profile.as_ref())
        .and_then(CustomerProfile::display_name)
        .unwrap_or_default();
    let last_interaction = context
        .and_then(|c| c.recent_interactions.first())
        .map(|i| i.summary.clone())
        .unwrap_or_default();

    BTreeMap::from([
        ("customer_id".to_string(), customer_id.to_string()),
        ("customer_name".to_string(), customer_name),
        (
            "business_name".to_string(),
            business_name(context, fallback_business_name).to_string(),
        ),
        ("last_interaction".to_string(), last_interaction),
    ])
}

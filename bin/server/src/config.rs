//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested
//! settings use `__` as the separator, so `RELAY__TOOL_TIMEOUT_MS` sets
//! [`RelaySettings::tool_timeout_ms`].

use callrelay_relay::{HeartbeatConfig, HubConfig, ReconnectPolicy, SignedUrlConfig, TransportConfig};
use callrelay_store::{AssemblerConfig, NatsConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Tenant this process serves; part of every storage key.
    pub tenant: String,

    /// NATS key-value backend. Absent URL means in-memory storage.
    #[serde(default)]
    pub nats: NatsSettings,

    /// Upstream voice-agent service.
    pub upstream: UpstreamSettings,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub cache: CacheSettings,

    /// Customer data service used to assemble call context.
    pub context: ContextSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_nats_bucket")]
    pub bucket: String,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: None,
            bucket: default_nats_bucket(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSettings {
    /// HTTPS endpoint that hands out signed WebSocket URLs.
    pub signed_url_endpoint: String,
    pub api_key: String,
    pub agent_id: String,
    /// Overrides the greeting chosen from customer context.
    #[serde(default)]
    pub first_message: Option<String>,
}

/// Transport and hub tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    /// Per-dashboard-session queue capacity.
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_conversation_ttl_secs")]
    pub conversation_ttl_secs: u64,
    #[serde(default = "default_context_ttl_secs")]
    pub context_ttl_secs: u64,
    /// Hard response deadline for the initiation webhook.
    #[serde(default = "default_webhook_deadline_ms")]
    pub webhook_deadline_ms: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextSettings {
    pub base_url: String,
    #[serde(default = "default_business_name")]
    pub business_name: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_nats_bucket() -> String {
    "callrelay".to_string()
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    25_000
}

fn default_tool_timeout_ms() -> u64 {
    10_000
}

fn default_session_buffer() -> usize {
    256
}

fn default_conversation_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_context_ttl_secs() -> u64 {
    120
}

fn default_webhook_deadline_ms() -> u64 {
    100
}

fn default_history_limit() -> usize {
    5
}

fn default_business_name() -> String {
    "our store".to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            backoff_jitter: default_backoff_jitter(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            session_buffer: default_session_buffer(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            conversation_ttl_secs: default_conversation_ttl_secs(),
            context_ttl_secs: default_context_ttl_secs(),
            webhook_deadline_ms: default_webhook_deadline_ms(),
            history_limit: default_history_limit(),
        }
    }
}

impl RelaySettings {
    /// Builds the hub configuration, including its transport settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        let defaults = TransportConfig::default();
        HubConfig {
            transport: TransportConfig {
                reconnect: ReconnectPolicy {
                    base_delay: Duration::from_millis(self.backoff_base_ms),
                    max_delay: Duration::from_millis(self.backoff_max_ms),
                    max_attempts: self.max_reconnect_attempts,
                    jitter: self.backoff_jitter.clamp(0.0, 1.0),
                },
                heartbeat: HeartbeatConfig {
                    interval: Duration::from_millis(self.heartbeat_interval_ms),
                    timeout: Duration::from_millis(self.heartbeat_timeout_ms),
                },
                ..defaults
            },
            tool_timeout: Duration::from_millis(self.tool_timeout_ms),
            session_buffer: self.session_buffer,
        }
    }
}

impl CacheSettings {
    #[must_use]
    pub fn conversation_ttl(&self) -> Duration {
        Duration::from_secs(self.conversation_ttl_secs)
    }

    #[must_use]
    pub fn webhook_deadline(&self) -> Duration {
        Duration::from_millis(self.webhook_deadline_ms)
    }

    /// Assembly settings for the customer-context path.
    #[must_use]
    pub fn assembler_config(&self, business_name: &str) -> AssemblerConfig {
        AssemblerConfig {
            ttl: Duration::from_secs(self.context_ttl_secs),
            history_limit: self.history_limit,
            fallback_business_name: business_name.to_string(),
        }
    }
}

impl NatsSettings {
    /// Returns the backend config when a URL is set.
    #[must_use]
    pub fn backend_config(&self, max_age: Duration) -> Option<NatsConfig> {
        let url = self.url.as_deref().map(str::trim).filter(|url| !url.is_empty())?;
        Some(NatsConfig {
            url: url.to_string(),
            bucket_name: Some(self.bucket.clone()),
            max_age: Some(max_age),
        })
    }
}

impl UpstreamSettings {
    #[must_use]
    pub fn signed_url_config(&self) -> SignedUrlConfig {
        SignedUrlConfig {
            endpoint: self.signed_url_endpoint.clone(),
            agent_id: self.agent_id.clone(),
            api_key: self.api_key.clone(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(config::Environment::default())
    }

    /// Loads configuration from an explicit variable map instead of the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, config::ConfigError> {
        Self::load(config::Environment::default().source(Some(vars)))
    }

    fn load(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

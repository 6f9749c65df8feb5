use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::cache::EchoPolicy;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the realtime service
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Query parameter carrying the bearer token
    #[serde(default = "default_token_query_param")]
    pub token_query_param: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_endpoint() -> String {
    "ws://localhost:8888/realtime".into()
}
fn default_token_query_param() -> String {
    "token".into()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token_query_param: default_token_query_param(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect: ReconnectSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            auth: AuthSettings::default(),
            cache: CacheSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// Config pointing at the given endpoint, everything else default.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.endpoint_url()?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::validation(format!(
                "endpoint must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.token_query_param.is_empty() {
            return Err(ConfigError::validation("token_query_param must not be empty"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::validation("connect_timeout_ms must be > 0"));
        }
        // Reconnect validations
        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::validation("reconnect.base_delay_ms must be > 0"));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::validation(
                "reconnect.max_delay_ms must be >= reconnect.base_delay_ms",
            ));
        }
        if !(1..=10).contains(&self.reconnect.max_attempts) {
            return Err(ConfigError::validation(
                "reconnect.max_attempts must be between 1 and 10",
            ));
        }
        // Heartbeat validations
        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::validation("heartbeat.interval_ms must be > 0"));
        }
        if self.heartbeat.stale_after_ms != 0
            && self.heartbeat.stale_after_ms <= self.heartbeat.interval_ms
        {
            return Err(ConfigError::validation(
                "heartbeat.stale_after_ms must be 0 (disabled) or greater than heartbeat.interval_ms",
            ));
        }
        if self.auth.max_retries == 0 {
            return Err(ConfigError::validation("auth.max_retries must be > 0"));
        }
        if self.cache.broadcast_capacity == 0 {
            return Err(ConfigError::validation("cache.broadcast_capacity must be > 0"));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::validation(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::validation(format!("invalid endpoint {}: {e}", self.endpoint)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectSettings {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// Silence after which the connection is considered stale. 0 disables the check.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_stale_after_ms() -> u64 {
    90_000
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl HeartbeatSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_ms > 0).then(|| Duration::from_millis(self.stale_after_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_max_auth_retries")]
    pub max_retries: u32,
}

fn default_max_auth_retries() -> u32 {
    3
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_auth_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub echo_policy: EchoPolicy,
    /// Buffer of the deduplicated update stream
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_broadcast_capacity() -> usize {
    1024
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            echo_policy: EchoPolicy::default(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::RealtimeConfig;
    use crate::error::ConfigError;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "octofhir-realtime.toml";

    pub fn load_config(path: Option<&str>) -> Result<RealtimeConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., OCTOFHIR_REALTIME__RECONNECT__MAX_ATTEMPTS=8
        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR_REALTIME")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::parse(format!("config build error: {e}")))?;
        let merged: RealtimeConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::parse(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

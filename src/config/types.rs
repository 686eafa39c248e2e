use serde::Deserialize;

/// Main configuration structure for Video-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Query polled and served when a caller does not name one
    #[serde(rename = "default-query")]
    pub default_query: String,

    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Upstream search API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Search endpoint URL (query parameters are appended per request)
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Ordered list of credentials to rotate through on quota exhaustion
    #[serde(rename = "api-keys", default)]
    pub api_keys: Vec<String>,

    /// Single credential used when `api-keys` is empty. Never rotated.
    #[serde(rename = "api-key", default)]
    pub api_key: Option<String>,

    /// Total request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Polling schedule configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Interval recorded on new schedule registrations (seconds)
    #[serde(rename = "interval-secs", default = "default_interval_secs")]
    pub interval_secs: u64,

    /// How often the runner checks registrations for due work (milliseconds)
    #[serde(rename = "tick-millis", default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Maximum credential rotations per fetch cycle
    #[serde(rename = "max-quota-retries", default = "default_max_quota_retries")]
    pub max_quota_retries: u32,

    /// Fixed delay between quota retries (milliseconds)
    #[serde(rename = "quota-backoff-millis", default = "default_quota_backoff_millis")]
    pub quota_backoff_millis: u64,

    /// A cycle running longer than this is abandoned (seconds)
    #[serde(rename = "cycle-timeout-secs", default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Read API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "bind-address", default = "default_bind_address")]
    pub bind_address: String,
}

impl UpstreamConfig {
    /// Returns the configured credentials in rotation order.
    ///
    /// Falls back to the single `api-key` when the rotation list is empty.
    pub fn credentials(&self) -> Vec<String> {
        if !self.api_keys.is_empty() {
            return self.api_keys.clone();
        }
        self.api_key.iter().cloned().collect()
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            tick_millis: default_tick_millis(),
            max_quota_retries: default_max_quota_retries(),
            quota_backoff_millis: default_quota_backoff_millis(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.googleapis.com/youtube/v3/search".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("video-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_interval_secs() -> u64 {
    10
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_max_quota_retries() -> u32 {
    3
}

fn default_quota_backoff_millis() -> u64 {
    500
}

fn default_cycle_timeout_secs() -> u64 {
    60
}

fn default_bind_address() -> String {
    "127.0.0.1:8000".to_string()
}

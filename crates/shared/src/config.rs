//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Ledger engine tuning.
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Ledger engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// How many times a commit is retried after a serialization conflict.
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,
    /// Base backoff between commit retries, doubled per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Rolling window for per-key spend ceilings.
    #[serde(default = "default_spend_window_secs")]
    pub spend_window_secs: u64,
    /// Deadline for a single money-moving operation.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

fn default_max_commit_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    25
}

fn default_spend_window_secs() -> u64 {
    86_400
}

fn default_operation_timeout_ms() -> u64 {
    10_000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: default_max_commit_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            spend_window_secs: default_spend_window_secs(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("TESORO").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

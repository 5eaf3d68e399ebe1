use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

use crate::queue::{parse_utc_offset, PurgePolicy, RetryPolicy};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub operators: OperatorsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// API keys accepted when `method = "api_key"`
    #[serde(default)]
    pub credentials: Vec<ApiKeyCredential>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::ApiKey => "api_key",
        }
    }
}

/// One API key and the user id it authenticates as
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyCredential {
    pub key: String,
    pub user_id: String,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("walkin.db")
}

/// Queue behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Fixed offset that defines the local operating day, e.g. "+07:00"
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    /// Tickets deleted per batch during purges (1..=500)
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    /// Attempts per delete batch before a purge gives up
    #[serde(default = "default_delete_batch_attempts")]
    pub delete_batch_attempts: u32,
    /// Attempts for a conflicting state transaction
    #[serde(default = "default_max_transaction_attempts")]
    pub max_transaction_attempts: u32,
    /// Base backoff between retries in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            utc_offset: default_utc_offset(),
            delete_batch_size: default_delete_batch_size(),
            delete_batch_attempts: default_delete_batch_attempts(),
            max_transaction_attempts: default_max_transaction_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl QueueConfig {
    /// Parsed `utc_offset`; `None` if it is malformed.
    pub fn time_zone(&self) -> Option<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_transaction_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn purge_policy(&self) -> PurgePolicy {
        PurgePolicy::new(
            self.delete_batch_size,
            self.delete_batch_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

fn default_utc_offset() -> String {
    "+07:00".to_string()
}

fn default_delete_batch_size() -> usize {
    500
}

fn default_delete_batch_attempts() -> u32 {
    3
}

fn default_max_transaction_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    20
}

/// Who may call tickets and reset the queue
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OperatorsConfig {
    /// Operator user ids, compared case-insensitively
    #[serde(default)]
    pub allow: Vec<String>,
}

/// Midnight reset scheduler
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub operators: SanitizedOperatorsConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    /// Number of configured API keys; the keys themselves are never shown
    pub credentials_configured: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedOperatorsConfig {
    pub allowed_count: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: config.auth.method.as_str().to_string(),
                credentials_configured: config.auth.credentials.len(),
            },
            server: config.server.clone(),
            database: config.database.clone(),
            queue: config.queue.clone(),
            operators: SanitizedOperatorsConfig {
                allowed_count: config.operators.allow.len(),
            },
            scheduler: config.scheduler.clone(),
        }
    }
}

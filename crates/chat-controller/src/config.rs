//! Chat controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_WS_BIND_ADDRESS: &str = "0.0.0.0:4460";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default ring window in seconds (invite stays Ringing this long).
pub const DEFAULT_RING_WINDOW_SECONDS: u64 = 30;

/// Default backfill/sweep batch size.
pub const DEFAULT_SYNC_BATCH_SIZE: u32 = 100;

/// Default incremental sweep interval in seconds.
pub const DEFAULT_SYNC_SWEEP_INTERVAL_SECONDS: u64 = 5;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_CONNECTION_QUEUE_CAPACITY: usize = 200;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "chat";

/// Chat controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Postgres connection URL for the message store.
    /// Protected by `SecretString` to prevent accidental logging.
    pub database_url: SecretString,

    /// Search backend base URL (may embed credentials).
    /// Protected by `SecretString` to prevent accidental logging.
    pub search_url: SecretString,

    /// WebSocket server bind address (default: "0.0.0.0:4460").
    pub ws_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8082").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// Ring window in seconds before an unanswered invite times out.
    pub ring_window_seconds: u64,

    /// Batch size for search backfill and sweep runs.
    pub sync_batch_size: u32,

    /// Interval in seconds between incremental sweep passes.
    pub sync_sweep_interval_seconds: u64,

    /// Per-connection outbound queue capacity. A connection whose queue
    /// overflows is disconnected rather than allowed to stall fanout.
    pub connection_queue_capacity: usize,

    /// Whether to run a full resumable backfill at startup.
    pub backfill_on_start: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("search_url", &"[REDACTED]")
            .field("ws_bind_address", &self.ws_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field("ring_window_seconds", &self.ring_window_seconds)
            .field("sync_batch_size", &self.sync_batch_size)
            .field(
                "sync_sweep_interval_seconds",
                &self.sync_sweep_interval_seconds,
            )
            .field("connection_queue_capacity", &self.connection_queue_capacity)
            .field("backfill_on_start", &self.backfill_on_start)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = SecretString::from(
            vars.get("DATABASE_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
                .clone(),
        );

        let search_url = SecretString::from(
            vars.get("SEARCH_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("SEARCH_URL".to_string()))?
                .clone(),
        );

        let ws_bind_address = vars
            .get("CHAT_WS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_WS_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("CHAT_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let ring_window_seconds = vars
            .get("CHAT_RING_WINDOW_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RING_WINDOW_SECONDS);

        let sync_batch_size: u32 = vars
            .get("CHAT_SYNC_BATCH_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SYNC_BATCH_SIZE);

        if sync_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "CHAT_SYNC_BATCH_SIZE must be greater than zero".to_string(),
            ));
        }

        let sync_sweep_interval_seconds = vars
            .get("CHAT_SYNC_SWEEP_INTERVAL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SYNC_SWEEP_INTERVAL_SECONDS);

        let connection_queue_capacity = vars
            .get("CHAT_CONNECTION_QUEUE_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONNECTION_QUEUE_CAPACITY);

        let backfill_on_start = vars
            .get("CHAT_BACKFILL_ON_START")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(true);

        // Generate instance ID
        let instance_id = vars.get("CHAT_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            database_url,
            search_url,
            ws_bind_address,
            health_bind_address,
            instance_id,
            ring_window_seconds,
            sync_batch_size,
            sync_sweep_interval_seconds,
            connection_queue_capacity,
            backfill_on_start,
        })
    }
}

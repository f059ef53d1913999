//! Configuration handling for sqlkeep.
//!
//! Process-level settings come from CLI arguments and environment variables
//! (`Config`). Connection settings are looked up by key through a
//! [`ConfigSource`], so the same keys work from the environment or from an
//! embedding application's own configuration store.

use clap::Parser;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// Connection configuration keys
pub const KEY_DIALECT: &str = "DB_DIALECT";
pub const KEY_HOST: &str = "DB_HOST";
pub const KEY_USER: &str = "DB_USER";
pub const KEY_PASSWORD: &str = "DB_PASSWORD";
pub const KEY_PORT: &str = "DB_PORT";
pub const KEY_DATABASE: &str = "DB_NAME";
pub const KEY_MAX_OPEN_CONNECTIONS: &str = "DB_MAX_OPEN_CONNECTIONS";
pub const KEY_MIN_CONNECTIONS: &str = "DB_MIN_CONNECTIONS";
pub const KEY_IDLE_TIMEOUT: &str = "DB_IDLE_TIMEOUT";
pub const KEY_ACQUIRE_TIMEOUT: &str = "DB_ACQUIRE_TIMEOUT";

/// Key/value configuration lookup.
pub trait ConfigSource {
    /// Get the value for a key, if set.
    fn get(&self, key: &str) -> Option<String>;

    /// Get the value for a key, falling back to `default` when unset.
    fn get_or_default(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

/// Reads configuration keys from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory configuration, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigSource for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections kept open (default: 0)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Read pool options from a configuration source. Unparseable values are ignored.
    pub fn from_source(source: &impl ConfigSource) -> Self {
        Self {
            max_connections: source
                .get(KEY_MAX_OPEN_CONNECTIONS)
                .and_then(|v| v.trim().parse().ok()),
            min_connections: source
                .get(KEY_MIN_CONNECTIONS)
                .and_then(|v| v.trim().parse().ok()),
            idle_timeout_secs: source
                .get(KEY_IDLE_TIMEOUT)
                .and_then(|v| v.trim().parse().ok()),
            acquire_timeout_secs: source
                .get(KEY_ACQUIRE_TIMEOUT)
                .and_then(|v| v.trim().parse().ok()),
        }
    }

    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
            if let Some(min) = self.min_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Timing knobs for the connection manager's background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Fixed sleep between connection attempts.
    pub retry_interval: Duration,
    /// Period of the pool statistics sampler.
    pub stats_interval: Duration,
    /// Default timeout for the executor's `*_with_timeout` variants.
    pub query_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

impl ManagerOptions {
    /// Replace zero durations with their defaults. A zero sampler period
    /// cannot drive an interval and a zero timeout fails every probe.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        let or_default = |value: Duration, default: Duration| {
            if value.is_zero() { default } else { value }
        };
        Self {
            retry_interval: or_default(self.retry_interval, defaults.retry_interval),
            stats_interval: or_default(self.stats_interval, defaults.stats_interval),
            query_timeout: or_default(self.query_timeout, defaults.query_timeout),
        }
    }
}

/// Configuration for the sqlkeep binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sqlkeep",
    about = "Keeps a resilient SQL connection open and reports its health",
    version,
    author
)]
pub struct Config {
    /// Seconds to wait between connection attempts
    #[arg(
        long,
        default_value_t = DEFAULT_RETRY_INTERVAL_SECS,
        env = "SQLKEEP_RETRY_INTERVAL"
    )]
    pub retry_interval: u64,

    /// Seconds between pool statistics samples
    #[arg(
        long,
        default_value_t = DEFAULT_STATS_INTERVAL_SECS,
        env = "SQLKEEP_STATS_INTERVAL"
    )]
    pub stats_interval: u64,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "SQLKEEP_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SQLKEEP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQLKEEP_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL_SECS,
            stats_interval: DEFAULT_STATS_INTERVAL_SECS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Manager timing options derived from the CLI flags.
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            retry_interval: Duration::from_secs(self.retry_interval.max(1)),
            stats_interval: Duration::from_secs(self.stats_interval.max(1)),
            query_timeout: Duration::from_secs(self.query_timeout),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

//! Connection-related data models.
//!
//! This module defines types for database connection configuration and state.

use crate::config::{
    ConfigSource, KEY_DATABASE, KEY_DIALECT, KEY_HOST, KEY_PASSWORD, KEY_PORT, KEY_USER,
    PoolOptions,
};
use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Exact dialect name: `mysql`, `postgres` or `sqlite`.
    pub fn from_dialect(dialect: &str) -> Option<Self> {
        match dialect {
            "postgres" => Some(Self::PostgreSQL),
            "mysql" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Canonical dialect name.
    pub fn dialect(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Configuration for a database connection.
///
/// An empty `dialect` means no relational database is configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub dialect: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub pool_options: PoolOptions,
}

impl ConnectionConfig {
    /// Create a new connection configuration.
    pub fn new(
        dialect: impl Into<String>,
        host: impl Into<String>,
        port: Option<u16>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            dialect: dialect.into(),
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            pool_options: PoolOptions::default(),
        }
    }

    /// Read the connection configuration from a key/value source.
    pub fn from_source(source: &impl ConfigSource) -> Result<Self, ConnectionConfigError> {
        let port = match source.get(KEY_PORT) {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|_| ConnectionConfigError::InvalidPort(raw.clone()))?,
            ),
            _ => None,
        };

        let pool_options = PoolOptions::from_source(source);
        pool_options
            .validate()
            .map_err(ConnectionConfigError::InvalidPoolOptions)?;

        Ok(Self {
            dialect: source.get_or_default(KEY_DIALECT, "").trim().to_string(),
            host: source.get_or_default(KEY_HOST, ""),
            port,
            user: source.get_or_default(KEY_USER, ""),
            password: source.get_or_default(KEY_PASSWORD, ""),
            database: source.get_or_default(KEY_DATABASE, ""),
            pool_options,
        })
    }

    /// Use custom pool options.
    pub fn with_pool_options(mut self, pool_options: PoolOptions) -> Self {
        self.pool_options = pool_options;
        self
    }

    /// True when a dialect has been set.
    pub fn is_configured(&self) -> bool {
        !self.dialect.is_empty()
    }

    /// Database type for the configured dialect, if recognized.
    pub fn database_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_dialect(&self.dialect)
    }

    /// Port to connect to, falling back to the dialect default.
    pub fn port_or_default(&self) -> Option<u16> {
        self.port
            .or_else(|| self.database_type().and_then(|t| t.default_port()))
    }

    /// Host identifier reported in health checks (`host:port/database`).
    pub fn host_label(&self) -> String {
        match self.database_type() {
            Some(DatabaseType::SQLite) => self.database.clone(),
            _ => match self.port_or_default() {
                Some(port) => format!("{}:{}/{}", self.host, port, self.database),
                None => format!("{}/{}", self.host, self.database),
            },
        }
    }
}

/// Errors that can occur when reading a connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionConfigError {
    /// Port is not a valid TCP port number
    #[error("Invalid database port: {0}")]
    InvalidPort(String),

    /// Pool options are inconsistent
    #[error("Invalid pool options: {0}")]
    InvalidPoolOptions(String),
}

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No dialect configured; the manager stays inert.
    NotConfigured,
    /// Connect loop running, no successful ping yet.
    Connecting,
    Connected,
    /// Shut down, or construction aborted.
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

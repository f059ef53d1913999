//! Connection pool management.
//!
//! Uses database-specific pools (MySqlPool, PgPool, SqlitePool) to keep full
//! type support for each dialect.

use crate::db::stats::{self, WaitStats};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{ConnectionConfig, DatabaseType, PoolStats};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{MySqlPool, PgPool, SqlitePool};
use std::time::Duration;
use tracing::debug;

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Open a pool for `config` and verify it with a ping.
    pub async fn connect(config: &ConnectionConfig, db_type: DatabaseType) -> DbResult<Self> {
        let pool_opts = &config.pool_options;
        let is_sqlite = db_type == DatabaseType::SQLite;
        let max_connections = pool_opts.max_connections_or_default(is_sqlite);
        let min_connections = pool_opts.min_connections_or_default();
        let acquire_timeout = Duration::from_secs(pool_opts.acquire_timeout_or_default());
        let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));
        let port = config.port_or_default().unwrap_or_default();

        debug!(
            dialect = db_type.dialect(),
            host = %config.host_label(),
            max_connections,
            "Opening connection pool"
        );

        let pool = match db_type {
            DatabaseType::MySQL => {
                let mut options = MySqlConnectOptions::new()
                    .host(&config.host)
                    .port(port)
                    .username(&config.user)
                    .database(&config.database)
                    .charset("utf8");
                if !config.password.is_empty() {
                    options = options.password(&config.password);
                }
                let pool = MySqlPoolOptions::new()
                    .min_connections(min_connections)
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(db_type, &e))?;
                DbPool::MySql(pool)
            }
            DatabaseType::PostgreSQL => {
                let mut options = PgConnectOptions::new()
                    .host(&config.host)
                    .port(port)
                    .username(&config.user)
                    .database(&config.database)
                    .ssl_mode(PgSslMode::Disable);
                if !config.password.is_empty() {
                    options = options.password(&config.password);
                }
                let pool = PgPoolOptions::new()
                    .min_connections(min_connections)
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(db_type, &e))?;
                DbPool::Postgres(pool)
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::new()
                    .filename(&config.database)
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .min_connections(min_connections)
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(db_type, &e))?;
                DbPool::SQLite(pool)
            }
        };

        if let Err(e) = pool.ping().await {
            pool.close().await;
            return Err(connect_error(db_type, &e));
        }

        Ok(pool)
    }

    /// Lightweight liveness probe.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        impl_db_dispatch!(self, {
            MySql(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            Postgres(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            SQLite(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
        })
    }

    /// Current pool occupancy plus cumulative wait counters.
    pub fn stats(&self, waits: &WaitStats) -> PoolStats {
        impl_db_dispatch!(self, {
            MySql(p) => stats::sample(p, waits),
            Postgres(p) => stats::sample(p, waits),
            SQLite(p) => stats::sample(p, waits),
        })
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(p) => p.close().await,
            Postgres(p) => p.close().await,
            SQLite(p) => p.close().await,
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(self, {
            MySql(p) => p.is_closed(),
            Postgres(p) => p.is_closed(),
            SQLite(p) => p.is_closed(),
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

fn connect_error(db_type: DatabaseType, error: &sqlx::Error) -> DbError {
    DbError::connection(
        format!("Failed to connect: {}", error),
        connection_suggestion(db_type, error),
    )
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify DB_USER and DB_PASSWORD".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database named by DB_NAME exists".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL | DatabaseType::MySQL => {
            "Verify DB_HOST and DB_PORT point at a reachable server".to_string()
        }
        DatabaseType::SQLite => {
            "Verify the DB_NAME file path is writable".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_pool_connects_and_pings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let config =
            ConnectionConfig::new("sqlite", "", None, "", "", path.to_string_lossy());

        let pool = DbPool::connect(&config, DatabaseType::SQLite).await.unwrap();
        assert_eq!(pool.db_type(), DatabaseType::SQLite);
        assert!(pool.ping().await.is_ok());

        let stats = pool.stats(&WaitStats::new());
        assert_eq!(stats.max_open_connections, 1);

        pool.close().await;
        assert!(pool.is_closed());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_unreachable_postgres_is_connection_error() {
        // Port 1 is reserved and never has a listener.
        let config = ConnectionConfig::new("postgres", "127.0.0.1", Some(1), "u", "p", "app")
            .with_pool_options(crate::config::PoolOptions {
                acquire_timeout_secs: Some(2),
                ..Default::default()
            });

        let err = DbPool::connect(&config, DatabaseType::PostgreSQL)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_connection_suggestion_refused() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(
            connection_suggestion(DatabaseType::MySQL, &err).contains("MySQL server is running")
        );
    }
}

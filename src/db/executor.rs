//! Instrumented query execution.
//!
//! Every call is timed, runs inside a `sql` tracing span carrying the
//! statement, dialect and duration, and records an `app_sql_stats`
//! histogram observation. Driver results and errors pass through unchanged.
//!
//! Statements go through the `mysql`, `postgres` and `sqlite` helper
//! modules, generated from one template.

use crate::db::pool::DbPool;
use crate::db::stats::{self, WaitStats};
use crate::db::transaction::{DbTransaction, SqlTransaction};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::metrics::{Metrics, SQL_STATS_HISTOGRAM};
use crate::models::{DatabaseType, ExecResult, QueryParam, SqlRow, statement_kind};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{Instrument, debug, info_span};

/// Times statements, wraps them in a span and reports latency.
#[derive(Clone)]
pub(crate) struct QueryObserver {
    db_type: DatabaseType,
    metrics: Arc<dyn Metrics>,
}

impl QueryObserver {
    pub(crate) fn new(db_type: DatabaseType, metrics: Arc<dyn Metrics>) -> Self {
        Self { db_type, metrics }
    }

    pub(crate) fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Run `fut` as the execution of `sql`, optionally bounded by `limit`.
    pub(crate) async fn observe<T, F>(
        &self,
        sql: &str,
        limit: Option<Duration>,
        fut: F,
    ) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let kind = statement_kind(sql);
        let dialect = self.db_type.dialect();
        let span = info_span!(
            "sql",
            statement = %sql,
            dialect,
            duration_ms = tracing::field::Empty
        );

        let start = Instant::now();
        let result = match limit {
            Some(limit) => match timeout(limit, fut.instrument(span.clone())).await {
                Ok(result) => result,
                Err(_) => Err(DbError::timeout(
                    format!("{} statement", kind),
                    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                )),
            },
            None => fut.instrument(span.clone()).await,
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        span.record("duration_ms", elapsed_ms);
        span.in_scope(|| match &result {
            Ok(_) => debug!(duration_ms = elapsed_ms, "Statement executed"),
            Err(e) => debug!(duration_ms = elapsed_ms, error = %e, "Statement failed"),
        });

        self.metrics.record_histogram(
            SQL_STATS_HISTOGRAM,
            elapsed_ms,
            &[("type", kind), ("dialect", dialect.to_string())],
        );

        result
    }
}

impl std::fmt::Debug for QueryObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("db_type", &self.db_type)
            .finish_non_exhaustive()
    }
}

/// Pooled, instrumented SQL access. Cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct SqlExecutor {
    pool: DbPool,
    waits: Arc<WaitStats>,
    observer: QueryObserver,
    default_timeout: Duration,
}

impl SqlExecutor {
    pub fn new(
        pool: DbPool,
        waits: Arc<WaitStats>,
        metrics: Arc<dyn Metrics>,
        default_timeout: Duration,
    ) -> Self {
        let observer = QueryObserver::new(pool.db_type(), metrics);
        Self {
            pool,
            waits,
            observer,
            default_timeout,
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run a statement and return every row.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<SqlRow>> {
        self.observer
            .observe(sql, None, self.fetch_all(sql, params))
            .await
    }

    /// `query` bounded by `limit`, or the executor's default timeout when `None`.
    pub async fn query_with_timeout(
        &self,
        sql: &str,
        params: &[QueryParam],
        limit: Option<Duration>,
    ) -> DbResult<Vec<SqlRow>> {
        let limit = limit.unwrap_or(self.default_timeout);
        self.observer
            .observe(sql, Some(limit), self.fetch_all(sql, params))
            .await
    }

    /// Run a statement and return its first row, if any.
    pub async fn query_row(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<SqlRow>> {
        self.observer
            .observe(sql, None, self.fetch_optional(sql, params))
            .await
    }

    pub async fn query_row_with_timeout(
        &self,
        sql: &str,
        params: &[QueryParam],
        limit: Option<Duration>,
    ) -> DbResult<Option<SqlRow>> {
        let limit = limit.unwrap_or(self.default_timeout);
        self.observer
            .observe(sql, Some(limit), self.fetch_optional(sql, params))
            .await
    }

    /// Run a statement that returns no rows.
    pub async fn exec(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        self.observer
            .observe(sql, None, self.execute(sql, params))
            .await
    }

    pub async fn exec_with_timeout(
        &self,
        sql: &str,
        params: &[QueryParam],
        limit: Option<Duration>,
    ) -> DbResult<ExecResult> {
        let limit = limit.unwrap_or(self.default_timeout);
        self.observer
            .observe(sql, Some(limit), self.execute(sql, params))
            .await
    }

    /// Begin a transaction on a dedicated pooled connection.
    pub async fn begin(&self) -> DbResult<SqlTransaction> {
        let tx = self
            .observer
            .observe("BEGIN", None, async {
                let tx = match &self.pool {
                    DbPool::MySql(p) => DbTransaction::MySql(p.begin().await?),
                    DbPool::Postgres(p) => DbTransaction::Postgres(p.begin().await?),
                    DbPool::SQLite(p) => DbTransaction::SQLite(p.begin().await?),
                };
                Ok::<_, DbError>(tx)
            })
            .await?;
        Ok(SqlTransaction::new(tx, self.observer.clone()))
    }

    async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<SqlRow>> {
        let rows = match &self.pool {
            DbPool::MySql(p) => {
                let mut conn = stats::acquire(p, &self.waits).await?;
                mysql::fetch_all(&mut conn, sql, params).await?
            }
            DbPool::Postgres(p) => {
                let mut conn = stats::acquire(p, &self.waits).await?;
                postgres::fetch_all(&mut conn, sql, params).await?
            }
            DbPool::SQLite(p) => {
                let mut conn = stats::acquire(p, &self.waits).await?;
                sqlite::fetch_all(&mut conn, sql, params).await?
            }
        };
        Ok(rows)
    }

    async fn fetch_optional(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<SqlRow>> {
        let row = match &self.pool {
            DbPool::MySql(p) => {
                let mut conn = stats::acquire(p, &self.waits).await?;
                mysql::fetch_optional(&mut conn, sql, params).await?
            }
            DbPool::Postgres(p) => {
                let mut conn = stats::acquire(p, &self.waits).await?;
                postgres::fetch_optional(&mut conn, sql, params).await?
            }
            DbPool::SQLite(p) => {
                let mut conn = stats::acquire(p, &self.waits).await?;
                sqlite::fetch_optional(&mut conn, sql, params).await?
            }
        };
        Ok(row)
    }

    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        let result = match &self.pool {
            DbPool::MySql(p) => {
                let mut conn = stats::acquire(p, &self.waits).await?;
                mysql::execute(&mut conn, sql, params).await?
            }
            DbPool::Postgres(p) => {
                let mut conn = stats::acquire(p, &self.waits).await?;
                postgres::execute(&mut conn, sql, params).await?
            }
            DbPool::SQLite(p) => {
                let mut conn = stats::acquire(p, &self.waits).await?;
                sqlite::execute(&mut conn, sql, params).await?
            }
        };
        Ok(result)
    }
}

// Per-dialect statement helpers. Each works on a single connection, so the
// same code serves pooled calls and calls made inside a transaction.
// Parameterless statements run as raw SQL so DDL and multi-statement scripts
// work without prepared statements.
macro_rules! dialect_statements {
    ($module:ident, $conn:ty, $db:ty, |$done:ident| $last_insert_id:expr) => {
        pub(crate) mod $module {
            use super::*;
            use crate::db::params::bind;
            use sqlx::Executor;

            pub async fn fetch_all(
                conn: &mut $conn,
                sql: &str,
                params: &[QueryParam],
            ) -> DbResult<Vec<SqlRow>> {
                let rows = if params.is_empty() {
                    conn.fetch_all(sql).await?
                } else {
                    bind::<$db>(sql, params).fetch_all(conn).await?
                };
                Ok(rows.iter().map(RowToJson::to_json_map).collect())
            }

            pub async fn fetch_optional(
                conn: &mut $conn,
                sql: &str,
                params: &[QueryParam],
            ) -> DbResult<Option<SqlRow>> {
                let row = if params.is_empty() {
                    conn.fetch_optional(sql).await?
                } else {
                    bind::<$db>(sql, params).fetch_optional(conn).await?
                };
                Ok(row.as_ref().map(RowToJson::to_json_map))
            }

            pub async fn execute(
                conn: &mut $conn,
                sql: &str,
                params: &[QueryParam],
            ) -> DbResult<ExecResult> {
                let $done = if params.is_empty() {
                    conn.execute(sql).await?
                } else {
                    bind::<$db>(sql, params).execute(conn).await?
                };
                Ok(ExecResult {
                    rows_affected: $done.rows_affected(),
                    last_insert_id: $last_insert_id,
                })
            }
        }
    };
}

dialect_statements!(mysql, sqlx::MySqlConnection, sqlx::MySql, |done| {
    i64::try_from(done.last_insert_id()).ok()
});
dialect_statements!(postgres, sqlx::PgConnection, sqlx::Postgres, |_done| None);
dialect_statements!(sqlite, sqlx::SqliteConnection, sqlx::Sqlite, |done| {
    Some(done.last_insert_rowid())
});

//! SQL transactions.
//!
//! A transaction holds a dedicated pooled connection until it is committed or
//! rolled back. Dropping it without either rolls it back.

use crate::db::executor::{QueryObserver, mysql, postgres, sqlite};
use crate::error::{DbError, DbResult};
use crate::impl_tx_dispatch;
use crate::models::{DatabaseType, ExecResult, QueryParam, SqlRow};
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use tracing::debug;

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.commit().await,
            Postgres(tx) => tx.commit().await,
            SQLite(tx) => tx.commit().await,
        })
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.rollback().await,
            Postgres(tx) => tx.rollback().await,
            SQLite(tx) => tx.rollback().await,
        })
    }
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbTransaction").field(&self.db_type()).finish()
    }
}

/// An open, instrumented SQL transaction.
#[derive(Debug)]
pub struct SqlTransaction {
    tx: DbTransaction,
    observer: QueryObserver,
}

impl SqlTransaction {
    pub(crate) fn new(tx: DbTransaction, observer: QueryObserver) -> Self {
        Self { tx, observer }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.observer.db_type()
    }

    pub async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<SqlRow>> {
        let Self { tx, observer } = self;
        let fut = async {
            impl_tx_dispatch!(tx, {
                MySql(tx) => mysql::fetch_all(tx, sql, params).await,
                Postgres(tx) => postgres::fetch_all(tx, sql, params).await,
                SQLite(tx) => sqlite::fetch_all(tx, sql, params).await,
            })
        };
        observer.observe(sql, None, fut).await
    }

    pub async fn query_row(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<SqlRow>> {
        let Self { tx, observer } = self;
        let fut = async {
            impl_tx_dispatch!(tx, {
                MySql(tx) => mysql::fetch_optional(tx, sql, params).await,
                Postgres(tx) => postgres::fetch_optional(tx, sql, params).await,
                SQLite(tx) => sqlite::fetch_optional(tx, sql, params).await,
            })
        };
        observer.observe(sql, None, fut).await
    }

    pub async fn exec(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        let Self { tx, observer } = self;
        let fut = async {
            impl_tx_dispatch!(tx, {
                MySql(tx) => mysql::execute(tx, sql, params).await,
                Postgres(tx) => postgres::execute(tx, sql, params).await,
                SQLite(tx) => sqlite::execute(tx, sql, params).await,
            })
        };
        observer.observe(sql, None, fut).await
    }

    pub async fn commit(self) -> DbResult<()> {
        let Self { tx, observer } = self;
        observer
            .observe("COMMIT", None, async { tx.commit().await.map_err(DbError::from) })
            .await?;
        debug!(dialect = observer.db_type().dialect(), "Transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> DbResult<()> {
        let Self { tx, observer } = self;
        observer
            .observe("ROLLBACK", None, async { tx.rollback().await.map_err(DbError::from) })
            .await?;
        debug!(dialect = observer.db_type().dialect(), "Transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::pool::DbPool;
    use crate::db::stats::WaitStats;
    use crate::db::executor::SqlExecutor;
    use crate::metrics::NoopMetrics;
    use std::sync::Arc;
    use std::time::Duration;

    async fn executor() -> (tempfile::TempDir, SqlExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("tx.db").display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        let executor = SqlExecutor::new(
            DbPool::SQLite(pool),
            Arc::new(WaitStats::new()),
            Arc::new(NoopMetrics),
            Duration::from_secs(5),
        );
        executor
            .exec("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)", &[])
            .await
            .unwrap();
        (dir, executor)
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let (_dir, executor) = executor().await;

        let mut tx = executor.begin().await.unwrap();
        tx.exec("INSERT INTO items (label) VALUES (?)", &["a".into()])
            .await
            .unwrap();
        let seen = tx.query("SELECT label FROM items", &[]).await.unwrap();
        assert_eq!(seen.len(), 1);
        tx.commit().await.unwrap();

        let rows = executor.query("SELECT label FROM items", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let (_dir, executor) = executor().await;

        let mut tx = executor.begin().await.unwrap();
        tx.exec("INSERT INTO items (label) VALUES ('b')", &[])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let row = executor
            .query_row("SELECT COUNT(*) AS n FROM items", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["n"], 0);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let (_dir, executor) = executor().await;

        {
            let mut tx = executor.begin().await.unwrap();
            tx.exec("INSERT INTO items (label) VALUES ('c')", &[])
                .await
                .unwrap();
        }

        let rows = executor.query("SELECT * FROM items", &[]).await.unwrap();
        assert!(rows.is_empty());
    }
}

//! Relational ledger.
//!
//! The ledger row is written inside the migration's own transaction, so the
//! schema change and its ledger entry commit or roll back together.

use super::data::MigrationData;
use super::record::{MIGRATION_LEDGER, MigrationRecord};
use crate::db::SqlExecutor;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, SqlRow};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

const CREATE_MIGRATION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (\
    version BIGINT NOT NULL PRIMARY KEY, \
    method VARCHAR(4) NOT NULL, \
    start_time TIMESTAMP NOT NULL, \
    duration BIGINT\
)";

const GET_LAST_MIGRATION: &str =
    "SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations";

fn insert_migration_record(db_type: DatabaseType) -> &'static str {
    match db_type {
        DatabaseType::PostgreSQL => {
            "INSERT INTO schema_migrations (version, method, start_time, duration) VALUES ($1, $2, $3, $4)"
        }
        DatabaseType::MySQL | DatabaseType::SQLite => {
            "INSERT INTO schema_migrations (version, method, start_time, duration) VALUES (?, ?, ?, ?)"
        }
    }
}

/// COALESCE never yields NULL, so a null or missing value means the driver
/// value could not be decoded.
fn ledger_version(row: Option<&SqlRow>) -> Option<i64> {
    match row?.get("version")? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Migrator for a relational datastore.
#[derive(Debug, Clone)]
pub struct SqlMigrator {
    executor: SqlExecutor,
}

impl SqlMigrator {
    pub fn new(executor: SqlExecutor) -> Self {
        Self { executor }
    }

    pub(crate) async fn check_and_create_migration_table(&self) -> DbResult<()> {
        self.executor.exec(CREATE_MIGRATION_TABLE, &[]).await?;
        debug!(table = MIGRATION_LEDGER, "SQL migration ledger ready");
        Ok(())
    }

    pub(crate) async fn last_migration(&self) -> DbResult<i64> {
        let row = self.executor.query_row(GET_LAST_MIGRATION, &[]).await?;
        ledger_version(row.as_ref()).ok_or_else(|| {
            DbError::internal(format!(
                "unexpected {} version value: {:?}",
                MIGRATION_LEDGER, row
            ))
        })
    }

    pub(crate) async fn begin_transaction(&self, data: &mut MigrationData) -> DbResult<()> {
        match self.executor.begin().await {
            Ok(tx) => {
                data.sql = Some(tx);
                Ok(())
            }
            Err(e) => {
                data.sql = None;
                Err(e)
            }
        }
    }

    pub(crate) async fn commit_migration(
        &self,
        data: &mut MigrationData,
        record: &MigrationRecord,
    ) -> DbResult<()> {
        let mut tx = data
            .sql
            .take()
            .ok_or_else(|| DbError::internal("SQL transaction missing at commit"))?;

        let params = [
            QueryParam::Int(record.version),
            QueryParam::from(record.method.as_str()),
            QueryParam::Timestamp(record.start_time.naive_utc()),
            QueryParam::Int(record.duration),
        ];
        if let Err(e) = tx
            .exec(insert_migration_record(tx.db_type()), &params)
            .await
        {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed ledger insert also failed");
            }
            return Err(e);
        }

        tx.commit().await
    }

    pub(crate) async fn rollback(&self, data: &mut MigrationData) -> DbResult<()> {
        match data.sql.take() {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }
}

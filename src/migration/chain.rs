//! Migrator chain.
//!
//! One [`Migrator`] per participating datastore. The runner drives the whole
//! chain; each migrator only fills and drains its own slot of the
//! [`MigrationData`] bundle.

use super::data::MigrationData;
use super::key_value::KeyValueMigrator;
use super::record::MigrationRecord;
use super::sql::SqlMigrator;
use crate::db::SqlExecutor;
use crate::error::{DbError, DbResult};
use crate::kv::KeyValueStore;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub enum Migrator {
    Sql(SqlMigrator),
    KeyValue(KeyValueMigrator),
}

impl Migrator {
    /// Datastore label used in logs and errors.
    pub fn datastore(&self) -> &'static str {
        match self {
            Self::Sql(_) => "sql",
            Self::KeyValue(_) => "key-value",
        }
    }

    async fn check_and_create_migration_table(&self) -> DbResult<()> {
        match self {
            Self::Sql(m) => m.check_and_create_migration_table().await,
            Self::KeyValue(m) => m.check_and_create_migration_table().await,
        }
    }

    async fn last_migration(&self) -> DbResult<i64> {
        match self {
            Self::Sql(m) => m.last_migration().await,
            Self::KeyValue(m) => m.last_migration().await,
        }
    }

    async fn begin_transaction(&self, data: &mut MigrationData) -> DbResult<()> {
        match self {
            Self::Sql(m) => m.begin_transaction(data).await,
            Self::KeyValue(m) => m.begin_transaction(data).await,
        }
    }

    async fn commit_migration(&self, data: &mut MigrationData, record: &MigrationRecord) -> DbResult<()> {
        match self {
            Self::Sql(m) => m.commit_migration(data, record).await,
            Self::KeyValue(m) => m.commit_migration(data, record).await,
        }
    }

    async fn rollback(&self, data: &mut MigrationData) -> DbResult<()> {
        match self {
            Self::Sql(m) => m.rollback(data).await,
            Self::KeyValue(m) => m.rollback(data).await,
        }
    }
}

/// Ordered list of migrators, one per datastore.
#[derive(Debug, Clone, Default)]
pub struct MigratorChain {
    migrators: Vec<Migrator>,
}

impl MigratorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sql(mut self, executor: SqlExecutor) -> Self {
        self.push(Migrator::Sql(SqlMigrator::new(executor)));
        self
    }

    pub fn with_key_value(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.push(Migrator::KeyValue(KeyValueMigrator::new(store)));
        self
    }

    pub fn push(&mut self, migrator: Migrator) {
        self.migrators.push(migrator);
    }

    pub fn is_empty(&self) -> bool {
        self.migrators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.migrators.len()
    }

    pub fn datastores(&self) -> Vec<&'static str> {
        self.migrators.iter().map(Migrator::datastore).collect()
    }

    pub async fn check_and_create_migration_table(&self) -> DbResult<()> {
        for migrator in &self.migrators {
            migrator
                .check_and_create_migration_table()
                .await
                .map_err(DbError::ledger_table)?;
        }
        Ok(())
    }

    /// Highest version recorded by each datastore, in chain order.
    pub async fn ledger_marks(&self) -> DbResult<Vec<i64>> {
        let mut marks = Vec::with_capacity(self.migrators.len());
        for migrator in &self.migrators {
            let version = migrator.last_migration().await?;
            debug!(datastore = migrator.datastore(), version, "last applied migration");
            marks.push(version);
        }
        Ok(marks)
    }

    /// Lowest of the per-datastore versions, 0 when none.
    ///
    /// A datastore that lags behind the others, after a failed commit, pulls
    /// the chain back so the missing versions are applied to it again.
    pub async fn last_migration(&self) -> DbResult<i64> {
        Ok(lowest_mark(&self.ledger_marks().await?))
    }

    /// Stops at the first failure; slots opened before it stay in `data`
    /// for the caller to roll back.
    pub async fn begin_transaction(&self, data: &mut MigrationData) -> DbResult<()> {
        for migrator in &self.migrators {
            migrator
                .begin_transaction(data)
                .await
                .map_err(|e| DbError::transaction_begin(migrator.datastore(), e))?;
        }
        Ok(())
    }

    /// Commits in chain order. Datastores whose mark already covers the
    /// version have their writes discarded instead, so each ledger records a
    /// version at most once.
    pub async fn commit_migration(
        &self,
        data: &mut MigrationData,
        record: &MigrationRecord,
        marks: &[i64],
    ) -> DbResult<()> {
        for (idx, migrator) in self.migrators.iter().enumerate() {
            let mark = marks.get(idx).copied().unwrap_or(0);
            let result = if mark >= record.version {
                debug!(
                    datastore = migrator.datastore(),
                    version = record.version,
                    mark,
                    "version already recorded, discarding writes"
                );
                migrator.rollback(data).await
            } else {
                migrator.commit_migration(data, record).await
            };
            result.map_err(|e| DbError::commit(record.version, migrator.datastore(), e))?;
        }
        Ok(())
    }

    /// Best effort: every migrator is asked to roll back, errors are logged.
    pub async fn rollback(&self, data: &mut MigrationData) {
        for migrator in &self.migrators {
            if let Err(e) = migrator.rollback(data).await {
                error!(
                    datastore = migrator.datastore(),
                    error = %e,
                    "unable to rollback migration transaction"
                );
            }
        }
    }
}

pub(crate) fn lowest_mark(marks: &[i64]) -> i64 {
    marks.iter().copied().min().unwrap_or(0)
}

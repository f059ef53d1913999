//! Migration runner.
//!
//! Pending migrations are applied one at a time in ascending order, starting
//! after the lowest version any datastore has recorded. The first failure
//! rolls back the current bundle and stops the run.

use super::chain::{MigratorChain, lowest_mark};
use super::data::MigrationData;
use super::record::MigrationRecord;
use super::registry::MigrationRegistry;
use crate::error::{DbError, DbResult};
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct MigrationRunner {
    chain: MigratorChain,
}

impl MigrationRunner {
    pub fn new(chain: MigratorChain) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &MigratorChain {
        &self.chain
    }

    /// Apply every registered migration newer than the ledger.
    ///
    /// Returns the versions applied by this call.
    pub async fn run(&self, registry: &MigrationRegistry) -> DbResult<Vec<i64>> {
        if self.chain.is_empty() {
            error!("no migrators configured, migrations will not be applied");
            return Ok(Vec::new());
        }

        self.chain.check_and_create_migration_table().await?;
        let marks = self.chain.ledger_marks().await?;
        let last = lowest_mark(&marks);

        let pending: Vec<_> = registry.pending(last).collect();
        if pending.is_empty() {
            debug!(last_migration = last, "migrations up to date");
            return Ok(Vec::new());
        }
        info!(
            last_migration = last,
            ledger_marks = ?marks,
            pending = pending.len(),
            datastores = ?self.chain.datastores(),
            "applying migrations"
        );

        let mut applied = Vec::with_capacity(pending.len());
        for (version, migration) in pending {
            let mut data = MigrationData::new();
            let start_time = Utc::now();
            let started = Instant::now();

            if let Err(e) = self.chain.begin_transaction(&mut data).await {
                error!(version, error = %e, "unable to begin migration transaction");
                self.chain.rollback(&mut data).await;
                return Err(e);
            }

            if let Err(e) = migration.up(&mut data).await {
                error!(version, error = %e, "migration failed, rolling back");
                self.chain.rollback(&mut data).await;
                return Err(DbError::migration_failed(version, e));
            }

            let record = MigrationRecord::up(version, start_time, started.elapsed());
            if let Err(e) = self.chain.commit_migration(&mut data, &record, &marks).await {
                error!(version, error = %e, "unable to commit migration");
                self.chain.rollback(&mut data).await;
                return Err(e);
            }

            info!(version, duration_ms = record.duration, "migration applied");
            applied.push(version);
        }

        Ok(applied)
    }
}

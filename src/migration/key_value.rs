//! Key-value ledger.
//!
//! Applied versions live in the `schema_migrations` hash: field = version,
//! value = JSON ledger record. Migration writes are buffered and applied in
//! one atomic batch together with the ledger entry.

use super::data::MigrationData;
use super::record::{MIGRATION_LEDGER, MigrationRecord};
use crate::error::{DbError, DbResult};
use crate::kv::{KeyValueStore, KeyValueTransaction};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct KeyValueMigrator {
    store: Arc<dyn KeyValueStore>,
}

impl KeyValueMigrator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Hashes are created on first write; this only verifies the store answers.
    pub(crate) async fn check_and_create_migration_table(&self) -> DbResult<()> {
        self.store.hash_get_all(MIGRATION_LEDGER).await?;
        debug!(hash = MIGRATION_LEDGER, "key-value migration ledger ready");
        Ok(())
    }

    pub(crate) async fn last_migration(&self) -> DbResult<i64> {
        let ledger = self.store.hash_get_all(MIGRATION_LEDGER).await?;
        let mut last = 0;
        for field in ledger.keys() {
            match field.parse::<i64>() {
                Ok(version) => last = last.max(version),
                Err(_) => warn!(field = %field, "ignoring non-numeric migration ledger field"),
            }
        }
        Ok(last)
    }

    pub(crate) async fn begin_transaction(&self, data: &mut MigrationData) -> DbResult<()> {
        data.key_value = Some(KeyValueTransaction::new(Arc::clone(&self.store)));
        Ok(())
    }

    pub(crate) async fn commit_migration(
        &self,
        data: &mut MigrationData,
        record: &MigrationRecord,
    ) -> DbResult<()> {
        let mut tx = data
            .key_value
            .take()
            .ok_or_else(|| DbError::internal("key-value transaction missing at commit"))?;

        let entry = serde_json::to_string(record)
            .map_err(|e| DbError::internal(format!("could not encode ledger record: {}", e)))?;
        tx.hash_set(MIGRATION_LEDGER, record.version.to_string(), entry);
        tx.commit().await
    }

    pub(crate) async fn rollback(&self, data: &mut MigrationData) -> DbResult<()> {
        if let Some(tx) = data.key_value.take() {
            let dropped = tx.discard();
            debug!(dropped, "discarded buffered key-value writes");
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeyValueMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueMigrator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKeyValueStore;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_commit_writes_ledger_and_buffered_ops() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let migrator = KeyValueMigrator::new(store.clone());
        let mut data = MigrationData::new();

        migrator.begin_transaction(&mut data).await.unwrap();
        data.key_value().unwrap().set("feature:on", "1");
        let record = MigrationRecord::up(4, Utc::now(), Duration::from_millis(3));
        migrator.commit_migration(&mut data, &record).await.unwrap();

        assert!(!data.has_key_value());
        assert_eq!(store.get("feature:on").await.unwrap().as_deref(), Some("1"));
        assert_eq!(migrator.last_migration().await.unwrap(), 4);

        let ledger = store.hash_get_all(MIGRATION_LEDGER).await.unwrap();
        let stored: serde_json::Value = serde_json::from_str(&ledger["4"]).unwrap();
        assert_eq!(stored["method"], "UP");
        assert_eq!(stored["duration"], 3);
    }

    #[tokio::test]
    async fn test_rollback_without_transaction_is_noop() {
        let migrator = KeyValueMigrator::new(Arc::new(MemoryKeyValueStore::new()));
        let mut data = MigrationData::new();
        migrator.rollback(&mut data).await.unwrap();
        migrator.rollback(&mut data).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_last_migration_empty_ledger_is_zero() {
        let migrator = KeyValueMigrator::new(Arc::new(MemoryKeyValueStore::new()));
        assert_eq!(migrator.last_migration().await.unwrap(), 0);
    }
}

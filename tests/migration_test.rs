//! Integration tests for the migration runner.

use async_trait::async_trait;
use sqlkeep::config::{ManagerOptions, PoolOptions};
use sqlkeep::db::{ConnectionManager, DriverRegistry, SqlExecutor};
use sqlkeep::error::{DbError, DbResult};
use sqlkeep::kv::{KeyValueOp, KeyValueStore, MemoryKeyValueStore};
use sqlkeep::metrics::{InMemoryMetrics, Metrics, NoopMetrics, SQL_STATS_HISTOGRAM};
use sqlkeep::migration::{
    MIGRATION_LEDGER, Migration, MigrationData, MigrationRegistry, MigrationRunner, MigratorChain,
};
use sqlkeep::models::{ConnectionConfig, QueryParam};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

type Applied = Arc<Mutex<Vec<i64>>>;

async fn sqlite_manager(
    dir: &TempDir,
    pool_options: PoolOptions,
    metrics: Arc<dyn Metrics>,
) -> ConnectionManager {
    let path = dir.path().join("migrations.db");
    let config = ConnectionConfig::new("sqlite", "", None, "", "", path.to_string_lossy())
        .with_pool_options(pool_options);
    let manager = ConnectionManager::new(
        config,
        &DriverRegistry::with_defaults(),
        metrics,
        ManagerOptions::default(),
    )
    .unwrap();
    manager.wait_until_connected().await.unwrap();
    manager
}

/// Migration that records its version and creates table `t<version>`.
fn create_table(version: i64, applied: &Applied) -> Migration {
    let applied = applied.clone();
    Migration::new(move |data| {
        let applied = applied.clone();
        Box::pin(async move {
            applied.lock().unwrap().push(version);
            let sql = format!("CREATE TABLE t{} (id INTEGER PRIMARY KEY)", version);
            data.sql()?.exec(&sql, &[]).await?;
            Ok(())
        })
    })
}

/// Migration that creates its table and then fails.
fn failing(version: i64, applied: &Applied) -> Migration {
    let applied = applied.clone();
    Migration::new(move |data| {
        let applied = applied.clone();
        Box::pin(async move {
            applied.lock().unwrap().push(version);
            let sql = format!("CREATE TABLE t{} (id INTEGER PRIMARY KEY)", version);
            data.sql()?.exec(&sql, &[]).await?;
            Err(DbError::invalid_input("boom"))
        })
    })
}

async fn table_exists(executor: &SqlExecutor, name: &str) -> bool {
    executor
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[QueryParam::from(name)],
        )
        .await
        .unwrap()
        .is_some()
}

async fn ledger_versions(executor: &SqlExecutor) -> Vec<i64> {
    executor
        .query(
            &format!("SELECT version FROM {} ORDER BY version", MIGRATION_LEDGER),
            &[],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| row["version"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_pending_migrations_apply_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir, PoolOptions::default(), Arc::new(NoopMetrics)).await;
    let executor = manager.executor().unwrap();
    let runner = MigrationRunner::new(MigratorChain::new().with_sql(executor.clone()));
    let applied: Applied = Arc::default();

    let mut first = MigrationRegistry::new();
    first.register(1, create_table(1, &applied)).unwrap();
    assert_eq!(runner.run(&first).await.unwrap(), vec![1]);

    let mut registry = MigrationRegistry::new();
    registry
        .register(5, create_table(5, &applied))
        .unwrap()
        .register(3, create_table(3, &applied))
        .unwrap()
        .register(1, create_table(1, &applied))
        .unwrap()
        .register(2, create_table(2, &applied))
        .unwrap();

    assert_eq!(runner.run(&registry).await.unwrap(), vec![2, 3, 5]);
    assert_eq!(*applied.lock().unwrap(), vec![1, 2, 3, 5]);
    assert_eq!(ledger_versions(&executor).await, vec![1, 2, 3, 5]);

    let row = executor
        .query_row(
            "SELECT method, duration FROM schema_migrations WHERE version = 5",
            &[],
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["method"], "UP");
    assert!(row["duration"].as_i64().unwrap() >= 0);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_failed_migration_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir, PoolOptions::default(), Arc::new(NoopMetrics)).await;
    let executor = manager.executor().unwrap();
    let runner = MigrationRunner::new(MigratorChain::new().with_sql(executor.clone()));
    let applied: Applied = Arc::default();

    let mut registry = MigrationRegistry::new();
    registry.register(1, create_table(1, &applied)).unwrap();
    registry.register(2, create_table(2, &applied)).unwrap();
    registry.register(3, failing(3, &applied)).unwrap();
    registry.register(5, create_table(5, &applied)).unwrap();

    let err = runner.run(&registry).await.unwrap_err();
    assert!(matches!(err, DbError::MigrationFailed { version: 3, .. }));
    assert_eq!(*applied.lock().unwrap(), vec![1, 2, 3]);

    // Version 3 was rolled back and version 5 never attempted.
    assert!(table_exists(&executor, "t2").await);
    assert!(!table_exists(&executor, "t3").await);
    assert!(!table_exists(&executor, "t5").await);
    assert_eq!(ledger_versions(&executor).await, vec![1, 2]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_rerun_without_pending_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = Arc::new(InMemoryMetrics::new());
    let manager = sqlite_manager(&dir, PoolOptions::default(), metrics.clone()).await;
    let executor = manager.executor().unwrap();
    let runner = MigrationRunner::new(MigratorChain::new().with_sql(executor.clone()));
    let applied: Applied = Arc::default();

    let mut registry = MigrationRegistry::new();
    registry.register(1, create_table(1, &applied)).unwrap();
    registry.register(2, create_table(2, &applied)).unwrap();
    assert_eq!(runner.run(&registry).await.unwrap(), vec![1, 2]);

    let transactions = || {
        metrics
            .observations(SQL_STATS_HISTOGRAM)
            .iter()
            .filter(|o| o.labels.iter().any(|(k, v)| *k == "type" && v == "BEGIN"))
            .count()
    };
    let before = transactions();
    assert_eq!(before, 2);

    assert!(runner.run(&registry).await.unwrap().is_empty());
    assert_eq!(transactions(), before);
    assert_eq!(*applied.lock().unwrap(), vec![1, 2]);
    assert_eq!(ledger_versions(&executor).await, vec![1, 2]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_rollback_of_empty_bundle_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir, PoolOptions::default(), Arc::new(NoopMetrics)).await;
    let chain = MigratorChain::new()
        .with_sql(manager.executor().unwrap())
        .with_key_value(Arc::new(MemoryKeyValueStore::new()));

    let mut data = MigrationData::new();
    chain.rollback(&mut data).await;
    chain.rollback(&mut data).await;
    assert!(data.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_failed_begin_does_not_advance_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let pool_options = PoolOptions {
        max_connections: Some(1),
        acquire_timeout_secs: Some(1),
        ..PoolOptions::default()
    };
    let manager = sqlite_manager(&dir, pool_options, Arc::new(NoopMetrics)).await;
    let executor = manager.executor().unwrap();
    let runner = MigrationRunner::new(MigratorChain::new().with_sql(executor.clone()));
    let applied: Applied = Arc::default();

    // Version 2 queues a transaction of its own for the only pooled
    // connection. It is handed over when version 2 commits, so beginning
    // version 3 times out.
    let holder: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::default();
    let hog = {
        let holder = holder.clone();
        let executor = executor.clone();
        let applied = applied.clone();
        Migration::new(move |data| {
            let holder = holder.clone();
            let executor = executor.clone();
            let applied = applied.clone();
            Box::pin(async move {
                applied.lock().unwrap().push(2);
                let handle = tokio::spawn(async move {
                    let tx = executor.begin().await;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    drop(tx);
                });
                *holder.lock().unwrap() = Some(handle);
                tokio::time::sleep(Duration::from_millis(100)).await;
                data.sql()?.exec("CREATE TABLE t2 (id INTEGER)", &[]).await?;
                Ok(())
            })
        })
    };

    let mut registry = MigrationRegistry::new();
    registry.register(1, create_table(1, &applied)).unwrap();
    registry.register(2, hog).unwrap();
    registry.register(3, create_table(3, &applied)).unwrap();

    let err = runner.run(&registry).await.unwrap_err();
    assert!(matches!(err, DbError::TransactionBegin { .. }), "{err}");
    assert_eq!(*applied.lock().unwrap(), vec![1, 2]);

    let handle = holder.lock().unwrap().take().unwrap();
    handle.await.unwrap();

    assert_eq!(ledger_versions(&executor).await, vec![1, 2]);

    // The next run picks up the version that never began.
    let mut retry = MigrationRegistry::new();
    retry.register(3, create_table(3, &applied)).unwrap();
    assert_eq!(runner.run(&retry).await.unwrap(), vec![3]);
    assert_eq!(ledger_versions(&executor).await, vec![1, 2, 3]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_composite_chain_commits_every_datastore() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir, PoolOptions::default(), Arc::new(NoopMetrics)).await;
    let executor = manager.executor().unwrap();
    let store = Arc::new(MemoryKeyValueStore::new());
    let runner = MigrationRunner::new(
        MigratorChain::new()
            .with_sql(executor.clone())
            .with_key_value(store.clone()),
    );

    let mut registry = MigrationRegistry::new();
    registry
        .register(
            1,
            Migration::new(|data| {
                Box::pin(async move {
                    data.sql()?
                        .exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &[])
                        .await?;
                    data.key_value()?.set("users:schema", "v1");
                    Ok(())
                })
            }),
        )
        .unwrap()
        .register(
            2,
            Migration::new(|data| {
                Box::pin(async move {
                    data.sql()?
                        .exec("ALTER TABLE users ADD COLUMN email TEXT", &[])
                        .await?;
                    data.key_value()?.set("users:schema", "v2");
                    Err(DbError::invalid_input("abort after both writes"))
                })
            }),
        )
        .unwrap();

    let err = runner.run(&registry).await.unwrap_err();
    assert!(matches!(err, DbError::MigrationFailed { version: 2, .. }));

    // Version 1 landed in both stores, version 2 in neither.
    assert_eq!(ledger_versions(&executor).await, vec![1]);
    assert_eq!(store.get("users:schema").await.unwrap().as_deref(), Some("v1"));
    let kv_ledger = store.hash_get_all(MIGRATION_LEDGER).await.unwrap();
    assert_eq!(kv_ledger.len(), 1);
    assert!(kv_ledger.contains_key("1"));
    let columns = executor
        .query("SELECT name FROM pragma_table_info('users')", &[])
        .await
        .unwrap();
    assert_eq!(columns.len(), 2);

    manager.shutdown().await;
}

/// Store whose first `failures` atomic batches fail.
struct FlakyStore {
    inner: MemoryKeyValueStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryKeyValueStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn hash_get_all(&self, key: &str) -> DbResult<HashMap<String, String>> {
        self.inner.hash_get_all(key).await
    }

    async fn apply(&self, ops: Vec<KeyValueOp>) -> DbResult<()> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DbError::key_value("EXEC aborted"));
        }
        self.inner.apply(ops).await
    }
}

/// Migration that writes `k<version>` to the key-value store and creates a
/// table that may already exist.
fn dual_write(version: i64, applied: &Applied) -> Migration {
    let applied = applied.clone();
    Migration::new(move |data| {
        let applied = applied.clone();
        Box::pin(async move {
            applied.lock().unwrap().push(version);
            let sql = format!("CREATE TABLE IF NOT EXISTS t{} (id INTEGER PRIMARY KEY)", version);
            data.sql()?.exec(&sql, &[]).await?;
            data.key_value()?
                .set(format!("k{}", version), format!("v{}", version));
            Ok(())
        })
    })
}

#[tokio::test]
async fn test_key_value_commit_failure_is_reapplied_on_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir, PoolOptions::default(), Arc::new(NoopMetrics)).await;
    let executor = manager.executor().unwrap();
    let store = Arc::new(FlakyStore::new(1));
    let runner = MigrationRunner::new(
        MigratorChain::new()
            .with_sql(executor.clone())
            .with_key_value(store.clone()),
    );
    let applied: Applied = Arc::default();

    let mut registry = MigrationRegistry::new();
    registry.register(1, dual_write(1, &applied)).unwrap();
    registry.register(2, dual_write(2, &applied)).unwrap();

    let err = runner.run(&registry).await.unwrap_err();
    match err {
        DbError::Commit {
            version, datastore, ..
        } => {
            assert_eq!(version, 1);
            assert_eq!(datastore, "key-value");
        }
        other => panic!("expected commit error, got {other}"),
    }
    assert_eq!(*applied.lock().unwrap(), vec![1]);
    assert_eq!(ledger_versions(&executor).await, vec![1]);
    assert_eq!(store.get("k1").await.unwrap(), None);
    assert_eq!(runner.chain().ledger_marks().await.unwrap(), vec![1, 0]);

    // The lagging key-value store pulls version 1 back in; the SQL side of
    // it is discarded because its ledger already has the row.
    assert_eq!(runner.run(&registry).await.unwrap(), vec![1, 2]);
    assert_eq!(*applied.lock().unwrap(), vec![1, 1, 2]);
    assert_eq!(ledger_versions(&executor).await, vec![1, 2]);
    assert_eq!(store.get("k1").await.unwrap().as_deref(), Some("v1"));
    assert_eq!(store.get("k2").await.unwrap().as_deref(), Some("v2"));
    let kv_ledger = store.hash_get_all(MIGRATION_LEDGER).await.unwrap();
    assert!(kv_ledger.contains_key("1"));
    assert!(kv_ledger.contains_key("2"));

    assert!(runner.run(&registry).await.unwrap().is_empty());
    manager.shutdown().await;
}

#[tokio::test]
async fn test_empty_registry_still_creates_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir, PoolOptions::default(), Arc::new(NoopMetrics)).await;
    let executor = manager.executor().unwrap();
    let runner = MigrationRunner::new(MigratorChain::new().with_sql(executor.clone()));

    assert!(runner.run(&MigrationRegistry::new()).await.unwrap().is_empty());
    assert!(table_exists(&executor, MIGRATION_LEDGER).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_ledger_table_failure_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir, PoolOptions::default(), Arc::new(NoopMetrics)).await;
    let executor = manager.executor().unwrap();
    manager.shutdown().await;

    let runner = MigrationRunner::new(MigratorChain::new().with_sql(executor));
    let applied: Applied = Arc::default();
    let mut registry = MigrationRegistry::new();
    registry.register(1, create_table(1, &applied)).unwrap();

    let err = runner.run(&registry).await.unwrap_err();
    assert!(matches!(err, DbError::LedgerTable { .. }));
    assert!(applied.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_chain_applies_nothing() {
    let applied: Applied = Arc::default();
    let mut registry = MigrationRegistry::new();
    registry.register(1, create_table(1, &applied)).unwrap();

    let runner = MigrationRunner::new(MigratorChain::new());
    assert!(runner.run(&registry).await.unwrap().is_empty());
    assert!(applied.lock().unwrap().is_empty());
}

//! Resilient SQL connection manager.
//!
//! Construction validates the dialect and driver synchronously, then hands
//! the connection attempt to a background task that retries with a fixed
//! interval until it succeeds. Once connected, a second background task
//! samples pool statistics and publishes them as gauges. Both tasks are owned
//! by the manager and stopped by [`ConnectionManager::shutdown`].

use crate::config::ManagerOptions;
use crate::db::dialect::masked_connection_string;
use crate::db::driver::DriverRegistry;
use crate::db::executor::SqlExecutor;
use crate::db::pool::DbPool;
use crate::db::stats::{self, WaitStats};
use crate::error::{DbError, DbResult};
use crate::metrics::Metrics;
use crate::models::{ConnectionConfig, ConnectionState, DatabaseType, HealthReport};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

struct Inner {
    config: ConnectionConfig,
    options: ManagerOptions,
    metrics: Arc<dyn Metrics>,
    waits: Arc<WaitStats>,
    state: watch::Sender<ConnectionState>,
    pool: RwLock<Option<DbPool>>,
    /// Background task handles. State transitions to `Disconnected` happen
    /// under this lock so no task is spawned after shutdown.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn pool(&self) -> Option<DbPool> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store a freshly opened pool and start the stats sampler.
    /// Returns the pool back when the manager was shut down meanwhile.
    fn install(self: &Arc<Self>, pool: DbPool) -> Option<DbPool> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if *self.state.borrow() == ConnectionState::Disconnected {
            return Some(pool);
        }

        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(pool);
        self.state.send_replace(ConnectionState::Connected);
        info!(
            dialect = self.config.dialect.as_str(),
            host = %self.config.host_label(),
            "connected to SQL database"
        );

        let weak = Arc::downgrade(self);
        let period = self.options.stats_interval;
        tasks.push(tokio::spawn(async move {
            sample_loop(weak, period).await;
        }));
        None
    }

    fn publish_stats(&self) {
        if let Some(pool) = self.pool() {
            let snapshot = pool.stats(&self.waits);
            stats::publish(&snapshot, self.metrics.as_ref());
            debug!(
                open = snapshot.open_connections,
                in_use = snapshot.in_use,
                idle = snapshot.idle,
                wait_count = snapshot.wait_count,
                "Published SQL pool statistics"
            );
        }
    }
}

/// Owns the connection pool for one configured SQL datastore.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create the manager and start connecting in the background.
    ///
    /// - Empty dialect: returns an inert manager in `NotConfigured` state.
    /// - Unknown dialect: logged, fails with `UnsupportedDialect`.
    /// - Dialect without a registered driver: logged, fails with `DriverRegistration`.
    ///
    /// Must be called from within a Tokio runtime when a dialect is configured.
    pub fn new(
        config: ConnectionConfig,
        drivers: &DriverRegistry,
        metrics: Arc<dyn Metrics>,
        options: ManagerOptions,
    ) -> DbResult<Self> {
        let normalized = options.normalized();
        if normalized != options {
            warn!(?options, ?normalized, "zero manager durations replaced with defaults");
        }
        let options = normalized;
        let (state, _) = watch::channel(ConnectionState::NotConfigured);
        let manager = Self {
            inner: Arc::new(Inner {
                config,
                options,
                metrics,
                waits: Arc::new(WaitStats::new()),
                state,
                pool: RwLock::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let config = &manager.inner.config;
        if !config.is_configured() {
            debug!("No SQL dialect configured; skipping connection");
            return Ok(manager);
        }

        let connection_string = masked_connection_string(config).inspect_err(|e| {
            error!(dialect = config.dialect.as_str(), error = %e, "invalid SQL configuration");
        })?;

        let db_type = drivers.resolve(&config.dialect).inspect_err(|e| {
            error!(dialect = config.dialect.as_str(), error = %e, "invalid SQL configuration");
        })?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DbError::internal(format!("connection manager needs a Tokio runtime: {}", e))
        })?;

        manager
            .inner
            .state
            .send_replace(ConnectionState::Connecting);
        info!(
            dialect = db_type.dialect(),
            connection = %connection_string,
            "connecting to SQL database"
        );

        let weak = Arc::downgrade(&manager.inner);
        let retry_interval = manager.inner.options.retry_interval;
        let handle = runtime.spawn(async move {
            connect_loop(weak, db_type, retry_interval).await;
        });
        manager
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        Ok(manager)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the pool is usable. Fails if the manager is unconfigured
    /// or shut down before a connection is established.
    pub async fn wait_until_connected(&self) -> DbResult<()> {
        let mut rx = self.subscribe();
        let state = *rx
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .map_err(|_| DbError::not_connected("connection manager dropped"))?;
        match state {
            ConnectionState::Connected => Ok(()),
            other => Err(DbError::not_connected(format!("state is {:?}", other))),
        }
    }

    /// Instrumented executor over the live pool.
    pub fn executor(&self) -> DbResult<SqlExecutor> {
        let pool = self.inner.pool().ok_or_else(|| {
            DbError::not_connected(format!("state is {:?}", self.state()))
        })?;
        Ok(SqlExecutor::new(
            pool,
            Arc::clone(&self.inner.waits),
            Arc::clone(&self.inner.metrics),
            self.inner.options.query_timeout,
        ))
    }

    pub fn db_type(&self) -> Option<DatabaseType> {
        self.inner.pool().map(|p| p.db_type())
    }

    /// Current pool statistics, if connected.
    pub fn pool_stats(&self) -> Option<crate::models::PoolStats> {
        self.inner.pool().map(|p| p.stats(&self.inner.waits))
    }

    /// Probe the database and report UP with pool statistics or DOWN with the cause.
    pub async fn health_check(&self) -> HealthReport {
        let host = self.inner.config.host_label();

        if !self.inner.config.is_configured() {
            return HealthReport::down(host, "not configured");
        }

        let Some(pool) = self.inner.pool() else {
            return HealthReport::down(
                host,
                format!("not connected (state: {:?})", self.state()),
            );
        };

        let probe_timeout = self.inner.options.query_timeout;
        match tokio::time::timeout(probe_timeout, pool.ping()).await {
            Ok(Ok(())) => HealthReport::up(host, pool.stats(&self.inner.waits)),
            Ok(Err(e)) => {
                warn!(error = %e, "SQL health probe failed");
                HealthReport::down(host, e.to_string())
            }
            Err(_) => HealthReport::down(
                host,
                format!("health probe timed out after {}ms", probe_timeout.as_millis()),
            ),
        }
    }

    /// Stop background tasks and close the pool.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.config.is_configured() {
                self.inner.state.send_replace(ConnectionState::Disconnected);
            }
            tasks.drain(..).collect()
        };

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        let pool = self
            .inner
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.close().await;
            info!(
                dialect = pool.db_type().dialect(),
                "SQL connection pool closed"
            );
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn connect_loop(inner: Weak<Inner>, db_type: DatabaseType, retry_interval: Duration) {
    loop {
        let Some(manager) = inner.upgrade() else {
            return;
        };

        match DbPool::connect(&manager.config, db_type).await {
            Ok(pool) => {
                if let Some(pool) = manager.install(pool) {
                    pool.close().await;
                }
                return;
            }
            Err(e) => {
                error!(
                    host = %manager.config.host_label(),
                    error = %e,
                    "could not connect to SQL database"
                );
                warn!(
                    retry_in_ms = retry_interval.as_millis() as u64,
                    "retrying SQL database connection"
                );
            }
        }

        drop(manager);
        tokio::time::sleep(retry_interval).await;
    }
}

async fn sample_loop(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(manager) = inner.upgrade() else {
            return;
        };
        manager.publish_stats();
    }
}

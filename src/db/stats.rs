//! Pool statistics sampling.
//!
//! sqlx pools report size and idle count directly. Wait accounting is kept
//! here: every acquisition that finds the pool saturated is counted along
//! with the time spent waiting for a slot.

use crate::error::DbResult;
use crate::metrics::{self, Metrics};
use crate::models::PoolStats;
use sqlx::pool::PoolConnection;
use sqlx::{Database, Pool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cumulative pool-slot wait counters.
#[derive(Debug, Default)]
pub struct WaitStats {
    count: AtomicU64,
    duration_nanos: AtomicU64,
}

impl WaitStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, waited: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.duration_nanos.fetch_add(
            u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanos.load(Ordering::Relaxed))
    }
}

/// Acquire a pooled connection, counting the acquisition as a wait when
/// every slot was busy at the time of the request.
pub async fn acquire<DB: Database>(
    pool: &Pool<DB>,
    waits: &WaitStats,
) -> DbResult<PoolConnection<DB>> {
    let saturated =
        pool.num_idle() == 0 && pool.size() >= pool.options().get_max_connections();
    let start = Instant::now();
    let conn = pool.acquire().await?;
    if saturated {
        waits.record(start.elapsed());
    }
    Ok(conn)
}

/// Snapshot a sqlx pool.
pub fn sample<DB: Database>(pool: &Pool<DB>, waits: &WaitStats) -> PoolStats {
    let open = pool.size();
    let idle = u32::try_from(pool.num_idle()).unwrap_or(u32::MAX).min(open);
    PoolStats {
        max_open_connections: pool.options().get_max_connections(),
        open_connections: open,
        in_use: open - idle,
        idle,
        wait_count: waits.count(),
        wait_duration: waits.duration(),
        // Not tracked by sqlx
        max_idle_closed: 0,
        max_idle_time_closed: 0,
        max_lifetime_closed: 0,
    }
}

/// Publish every `PoolStats` field as a gauge.
pub fn publish(stats: &PoolStats, sink: &dyn Metrics) {
    sink.set_gauge(
        metrics::SQL_MAX_OPEN_CONNECTIONS,
        stats.max_open_connections as f64,
    );
    sink.set_gauge(metrics::SQL_OPEN_CONNECTIONS, stats.open_connections as f64);
    sink.set_gauge(metrics::SQL_INUSE_CONNECTIONS, stats.in_use as f64);
    sink.set_gauge(metrics::SQL_IDLE_CONNECTIONS, stats.idle as f64);
    sink.set_gauge(metrics::SQL_WAIT_COUNT, stats.wait_count as f64);
    sink.set_gauge(
        metrics::SQL_WAIT_DURATION,
        stats.wait_duration.as_secs_f64() * 1000.0,
    );
    sink.set_gauge(metrics::SQL_MAX_IDLE_CLOSED, stats.max_idle_closed as f64);
    sink.set_gauge(
        metrics::SQL_MAX_IDLE_TIME_CLOSED,
        stats.max_idle_time_closed as f64,
    );
    sink.set_gauge(
        metrics::SQL_MAX_LIFETIME_CLOSED,
        stats.max_lifetime_closed as f64,
    );
}

//! Metrics sink abstraction.
//!
//! The connection manager publishes pool gauges and the executor records
//! per-statement latency through the [`Metrics`] trait. `OtelMetrics`
//! forwards to the global OpenTelemetry meter provider; `InMemoryMetrics`
//! keeps the last values for inspection.
//!
//! ## Published instruments
//!
//! | name                         | kind      | unit |
//! |------------------------------|-----------|------|
//! | `sql_max_open_connections`   | gauge     |      |
//! | `sql_open_connections`       | gauge     |      |
//! | `sql_inuse_connections`      | gauge     |      |
//! | `sql_idle_connections`       | gauge     |      |
//! | `sql_wait_count`             | gauge     |      |
//! | `sql_wait_duration`          | gauge     | ms   |
//! | `sql_max_idle_closed`        | gauge     |      |
//! | `sql_max_idle_time_closed`   | gauge     |      |
//! | `sql_max_lifetime_closed`    | gauge     |      |
//! | `app_sql_stats`              | histogram | ms   |

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Gauge, Histogram, Meter};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub const SQL_MAX_OPEN_CONNECTIONS: &str = "sql_max_open_connections";
pub const SQL_OPEN_CONNECTIONS: &str = "sql_open_connections";
pub const SQL_INUSE_CONNECTIONS: &str = "sql_inuse_connections";
pub const SQL_IDLE_CONNECTIONS: &str = "sql_idle_connections";
pub const SQL_WAIT_COUNT: &str = "sql_wait_count";
pub const SQL_WAIT_DURATION: &str = "sql_wait_duration";
pub const SQL_MAX_IDLE_CLOSED: &str = "sql_max_idle_closed";
pub const SQL_MAX_IDLE_TIME_CLOSED: &str = "sql_max_idle_time_closed";
pub const SQL_MAX_LIFETIME_CLOSED: &str = "sql_max_lifetime_closed";
pub const SQL_STATS_HISTOGRAM: &str = "app_sql_stats";

/// Destination for gauges and histograms.
pub trait Metrics: Send + Sync {
    fn set_gauge(&self, name: &'static str, value: f64);

    fn record_histogram(&self, name: &'static str, value: f64, labels: &[(&'static str, String)]);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn set_gauge(&self, _name: &'static str, _value: f64) {}

    fn record_histogram(
        &self,
        _name: &'static str,
        _value: f64,
        _labels: &[(&'static str, String)],
    ) {
    }
}

/// OpenTelemetry-backed metrics. Instruments are created lazily and cached by name.
pub struct OtelMetrics {
    meter: Meter,
    gauges: Mutex<HashMap<&'static str, Gauge<f64>>>,
    histograms: Mutex<HashMap<&'static str, Histogram<f64>>>,
}

impl OtelMetrics {
    /// Use the global meter provider.
    pub fn new() -> Self {
        Self::with_meter(opentelemetry::global::meter("sqlkeep"))
    }

    pub fn with_meter(meter: Meter) -> Self {
        Self {
            meter,
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for OtelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OtelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtelMetrics").finish_non_exhaustive()
    }
}

impl Metrics for OtelMetrics {
    fn set_gauge(&self, name: &'static str, value: f64) {
        let mut gauges = self.gauges.lock().unwrap_or_else(PoisonError::into_inner);
        let gauge = gauges
            .entry(name)
            .or_insert_with(|| self.meter.f64_gauge(name).build());
        gauge.record(value, &[]);
    }

    fn record_histogram(&self, name: &'static str, value: f64, labels: &[(&'static str, String)]) {
        let attributes: Vec<KeyValue> = labels
            .iter()
            .map(|(key, value)| KeyValue::new(*key, value.clone()))
            .collect();
        let mut histograms = self
            .histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let histogram = histograms
            .entry(name)
            .or_insert_with(|| self.meter.f64_histogram(name).with_unit("ms").build());
        histogram.record(value, &attributes);
    }
}

/// A recorded histogram observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub name: &'static str,
    pub value: f64,
    pub labels: Vec<(&'static str, String)>,
}

/// Keeps the latest gauge values and every histogram observation.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    gauges: Mutex<HashMap<&'static str, f64>>,
    gauge_updates: Mutex<u64>,
    observations: Mutex<Vec<Observation>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value of a gauge.
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    /// Total number of gauge writes.
    pub fn gauge_updates(&self) -> u64 {
        *self
            .gauge_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Histogram observations recorded under `name`.
    pub fn observations(&self, name: &str) -> Vec<Observation> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|o| o.name == name)
            .cloned()
            .collect()
    }
}

impl Metrics for InMemoryMetrics {
    fn set_gauge(&self, name: &'static str, value: f64) {
        self.gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
        *self
            .gauge_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn record_histogram(&self, name: &'static str, value: f64, labels: &[(&'static str, String)]) {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Observation {
                name,
                value,
                labels: labels.to_vec(),
            });
    }
}

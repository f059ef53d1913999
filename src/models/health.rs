//! Health and pool statistics models.

use serde::Serialize;
use std::time::Duration;

/// Point-in-time snapshot of connection pool occupancy and wait behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_open_connections: u32,
    pub open_connections: u32,
    pub in_use: u32,
    pub idle: u32,
    pub wait_count: u64,
    #[serde(serialize_with = "duration_ms")]
    pub wait_duration: Duration,
    pub max_idle_closed: u64,
    pub max_idle_time_closed: u64,
    pub max_lifetime_closed: u64,
}

fn duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthDetails {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PoolStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-datastore health report. DOWN reports carry a cause instead of stats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: HealthDetails,
}

impl HealthReport {
    pub fn up(host: impl Into<String>, stats: PoolStats) -> Self {
        Self {
            status: HealthStatus::Up,
            details: HealthDetails {
                host: host.into(),
                stats: Some(stats),
                error: None,
            },
        }
    }

    pub fn down(host: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Down,
            details: HealthDetails {
                host: host.into(),
                stats: None,
                error: Some(error.into()),
            },
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == HealthStatus::Up
    }
}

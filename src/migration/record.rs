//! Ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ledger table / hash name shared by every datastore.
pub const MIGRATION_LEDGER: &str = "schema_migrations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MigrationMethod {
    Up,
}

impl MigrationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
        }
    }
}

impl std::fmt::Display for MigrationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    #[serde(skip)]
    pub version: i64,
    pub method: MigrationMethod,
    pub start_time: DateTime<Utc>,
    /// Milliseconds
    pub duration: i64,
}

impl MigrationRecord {
    pub fn up(version: i64, start_time: DateTime<Utc>, elapsed: Duration) -> Self {
        Self {
            version,
            method: MigrationMethod::Up,
            start_time,
            duration: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_shape() {
        let start = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = MigrationRecord::up(7, start, Duration::from_millis(1500));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["method"], "UP");
        assert_eq!(json["startTime"], "2024-03-01T10:00:00Z");
        assert_eq!(json["duration"], 1500);
        assert!(json.get("version").is_none());
    }
}

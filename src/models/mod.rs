//! Data models for sqlkeep.
//!
//! This module re-exports all model types used throughout the library.

pub mod connection;
pub mod health;
pub mod query;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, ConnectionState, DatabaseType};
pub use health::{HealthDetails, HealthReport, HealthStatus, PoolStats};
pub use query::{ExecResult, QueryParam, SqlRow, statement_kind};

//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Dialect resolution and connection strings
//! - Explicit driver registration
//! - Connection pool management with background retry and stats sampling
//! - Instrumented query execution and transactions
//! - Type mappings
//! - Database dispatch macros for reducing code duplication

pub mod dialect;
pub mod driver;
pub mod executor;
pub mod macros;
pub mod manager;
pub mod params;
pub mod pool;
pub mod stats;
pub mod transaction;
pub mod types;

pub use dialect::{build_connection_string, masked_connection_string};
pub use driver::DriverRegistry;
pub use executor::SqlExecutor;
pub use manager::ConnectionManager;
pub use pool::DbPool;
pub use stats::WaitStats;
pub use transaction::{DbTransaction, SqlTransaction};

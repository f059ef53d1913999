//! sqlkeep Library
//!
//! This library provides a resilient SQL connection manager (MySQL, PostgreSQL,
//! SQLite) and a transactional migration runner that can span several
//! datastores in one logical migration.

pub mod config;
pub mod db;
pub mod error;
pub mod kv;
pub mod metrics;
pub mod migration;
pub mod models;

pub use config::{Config, ConfigSource, EnvConfig, MapConfig};
pub use db::{ConnectionManager, DriverRegistry, SqlExecutor};
pub use error::{DbError, DbResult};
pub use migration::{MigrationRegistry, MigrationRunner, MigratorChain};

//! Versioned migrations across one or more datastores.
//!
//! A [`MigrationRunner`] drives a [`MigratorChain`] over the migrations in a
//! [`MigrationRegistry`]. Each migration body receives a [`MigrationData`]
//! bundle holding one open transaction per datastore in the chain.

mod chain;
mod data;
mod key_value;
mod record;
mod registry;
mod runner;
mod sql;

pub use chain::{Migrator, MigratorChain};
pub use data::MigrationData;
pub use key_value::KeyValueMigrator;
pub use record::{MIGRATION_LEDGER, MigrationMethod, MigrationRecord};
pub use registry::{Migration, MigrationRegistry};
pub use runner::MigrationRunner;
pub use sql::SqlMigrator;

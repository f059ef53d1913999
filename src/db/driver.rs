//! Explicit dialect to driver registry.
//!
//! The connection manager only opens pools for dialects registered here, and
//! only registered drivers are routed through the instrumented executor.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, DatabaseType>,
}

impl DriverRegistry {
    /// An empty registry. Every dialect fails registration until added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in mysql, postgres and sqlite drivers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DatabaseType::MySQL.dialect(), DatabaseType::MySQL);
        registry.register(DatabaseType::PostgreSQL.dialect(), DatabaseType::PostgreSQL);
        registry.register(DatabaseType::SQLite.dialect(), DatabaseType::SQLite);
        registry
    }

    /// Register (or replace) the driver used for `dialect`.
    pub fn register(&mut self, dialect: impl Into<String>, db_type: DatabaseType) -> &mut Self {
        self.drivers.insert(dialect.into(), db_type);
        self
    }

    pub fn is_registered(&self, dialect: &str) -> bool {
        self.drivers.contains_key(dialect)
    }

    /// Resolve the traced driver for a dialect.
    pub fn resolve(&self, dialect: &str) -> DbResult<DatabaseType> {
        self.drivers
            .get(dialect)
            .copied()
            .ok_or_else(|| {
                DbError::driver_registration(
                    dialect,
                    format!("sql: unknown driver \"{}\" (not registered)", dialect),
                )
            })
    }
}

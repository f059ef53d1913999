use crate::db::SqlTransaction;
use crate::error::{DbError, DbResult};
use crate::kv::KeyValueTransaction;

/// Per-migration bundle of open transactions, one slot per datastore kind.
///
/// A slot is `None` when that datastore does not participate or its
/// transaction could not be started.
#[derive(Debug, Default)]
pub struct MigrationData {
    pub(crate) sql: Option<SqlTransaction>,
    pub(crate) key_value: Option<KeyValueTransaction>,
}

impl MigrationData {
    pub fn new() -> Self {
        Self::default()
    }

    /// The SQL transaction for this migration.
    pub fn sql(&mut self) -> DbResult<&mut SqlTransaction> {
        self.sql
            .as_mut()
            .ok_or_else(|| DbError::invalid_input("no SQL transaction in this migration"))
    }

    /// The buffered key-value transaction for this migration.
    pub fn key_value(&mut self) -> DbResult<&mut KeyValueTransaction> {
        self.key_value
            .as_mut()
            .ok_or_else(|| DbError::invalid_input("no key-value transaction in this migration"))
    }

    pub fn has_sql(&self) -> bool {
        self.sql.is_some()
    }

    pub fn has_key_value(&self) -> bool {
        self.key_value.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_none() && self.key_value.is_none()
    }
}

//! Versioned migration registry.

use super::data::MigrationData;
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::ops::Bound;

type UpFn = dyn for<'a> Fn(&'a mut MigrationData) -> BoxFuture<'a, DbResult<()>> + Send + Sync;

/// A migration body. It may only touch datastores through the bundle it is given.
///
/// ```ignore
/// Migration::new(|data| Box::pin(async move {
///     data.sql()?.exec("CREATE TABLE users (id BIGINT PRIMARY KEY)", &[]).await?;
///     Ok(())
/// }))
/// ```
pub struct Migration {
    up: Box<UpFn>,
}

impl Migration {
    pub fn new<F>(up: F) -> Self
    where
        F: for<'a> Fn(&'a mut MigrationData) -> BoxFuture<'a, DbResult<()>> + Send + Sync + 'static,
    {
        Self { up: Box::new(up) }
    }

    pub(crate) fn up<'a>(&self, data: &'a mut MigrationData) -> BoxFuture<'a, DbResult<()>> {
        (self.up)(data)
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration").finish_non_exhaustive()
    }
}

/// Migrations keyed by version, iterated in ascending order.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    migrations: BTreeMap<i64, Migration>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a migration. Versions must be positive and unique.
    pub fn register(&mut self, version: i64, migration: Migration) -> DbResult<&mut Self> {
        if version <= 0 {
            return Err(DbError::invalid_input(format!(
                "migration version must be positive, got {}",
                version
            )));
        }
        if self.migrations.contains_key(&version) {
            return Err(DbError::invalid_input(format!(
                "migration version {} registered twice",
                version
            )));
        }
        self.migrations.insert(version, migration);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn versions(&self) -> Vec<i64> {
        self.migrations.keys().copied().collect()
    }

    pub fn max_version(&self) -> Option<i64> {
        self.migrations.keys().next_back().copied()
    }

    /// Migrations with a version strictly greater than `last`, ascending.
    pub fn pending(&self, last: i64) -> impl Iterator<Item = (i64, &Migration)> {
        self.migrations
            .range((Bound::Excluded(last), Bound::Unbounded))
            .map(|(version, migration)| (*version, migration))
    }
}

//! Dialect dispatch.
//!
//! Pools and transactions are enums with one variant per dialect. These
//! macros expand to the `match` over those variants so each arm sees its
//! concrete sqlx type.

/// Match on a `DbPool`, binding the inner pool in every arm.
///
/// ```ignore
/// impl_db_dispatch!(&self.pool, {
///     MySql(p) => p.size(),
///     Postgres(p) => p.size(),
///     SQLite(p) => p.size(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($target:expr, { $($variant:ident($inner:ident) => $arm:expr),+ $(,)? }) => {
        match $target {
            $( $crate::db::pool::DbPool::$variant($inner) => $arm, )+
        }
    };
}

/// Same as [`impl_db_dispatch!`] for `DbTransaction`.
#[macro_export]
macro_rules! impl_tx_dispatch {
    ($target:expr, { $($variant:ident($inner:ident) => $arm:expr),+ $(,)? }) => {
        match $target {
            $( $crate::db::transaction::DbTransaction::$variant($inner) => $arm, )+
        }
    };
}

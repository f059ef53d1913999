//! Parameter binding.
//!
//! One generic binder serves every dialect; the bounds list the Rust types
//! each `QueryParam` variant is encoded as. SQLite stores timestamps as
//! ISO-8601 text.

use crate::models::QueryParam;
use chrono::NaiveDateTime;
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

pub(crate) type BoundQuery<'q, DB> = Query<'q, DB, <DB as Database>::Arguments<'q>>;

/// Prepare `sql` with `params` bound positionally.
pub(crate) fn bind<'q, DB>(sql: &'q str, params: &'q [QueryParam]) -> BoundQuery<'q, DB>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
    NaiveDateTime: Encode<'q, DB> + Type<DB>,
{
    params
        .iter()
        .fold(sqlx::query::<DB>(sql), |query, param| match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
            QueryParam::Timestamp(v) => query.bind(*v),
        })
}

//! Row decoding into JSON maps.
//!
//! Each column is first classified into a [`TypeCategory`] from its type
//! name, then decoded with the Rust types the dialect's driver accepts for
//! that category. Values that cannot be decoded become `null`.

use crate::models::{DatabaseType, SqlRow};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Timestamp,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let name = type_name.to_ascii_lowercase();
    let has = |needle: &str| name.contains(needle);
    let sqlite = db == DatabaseType::SQLite;

    match name.as_str() {
        // SQLite's NUMERIC affinity holds floats
        "numeric" if sqlite => TypeCategory::Float,
        _ if has("decimal") || has("numeric") => TypeCategory::Decimal,
        _ if has("int") || has("serial") => TypeCategory::Integer,
        "bool" | "boolean" => TypeCategory::Boolean,
        "real" => TypeCategory::Float,
        _ if has("float") || has("double") => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        // SQLite keeps timestamps as text
        "datetime" if !sqlite => TypeCategory::Timestamp,
        _ if !sqlite && name.starts_with("timestamp") => TypeCategory::Timestamp,
        "bytea" => TypeCategory::Binary,
        _ if has("blob") || has("binary") => TypeCategory::Binary,
        "text" | "name" => TypeCategory::Text,
        _ if has("char") => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

/// DECIMAL/NUMERIC values kept as their exact string representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

fn is_decimal_type(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("decimal") || name.contains("numeric")
}

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        is_decimal_type(ty.name())
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        <&str as Decode<sqlx::MySql>>::decode(value).map(|s| RawDecimal(s.to_owned()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        is_decimal_type(ty.name())
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        <&str as Decode<sqlx::Postgres>>::decode(value).map(|s| RawDecimal(s.to_owned()))
    }
}

/// Binary columns as text when they hold valid UTF-8, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) => STANDARD.encode(bytes),
    };
    JsonValue::String(text)
}

/// Non-finite floats have no JSON number form.
fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Converts a driver row into a column-name keyed JSON map.
pub trait RowToJson {
    fn to_json_map(&self) -> SqlRow;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> SqlRow {
        collect_row(self, |row, idx, type_name| {
            mysql_value(row, idx, categorize_type(type_name, DatabaseType::MySQL))
        })
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> SqlRow {
        collect_row(self, |row, idx, type_name| {
            postgres_value(row, idx, categorize_type(type_name, DatabaseType::PostgreSQL))
        })
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> SqlRow {
        collect_row(self, |row, idx, declared| {
            // Expression columns have no declared type; the stored value's type is used instead.
            let stored = row
                .try_get_raw(idx)
                .ok()
                .filter(|raw| !raw.is_null())
                .map(|raw| raw.type_info().name().to_owned());
            let type_name = stored.as_deref().unwrap_or(declared);
            sqlite_value(row, idx, categorize_type(type_name, DatabaseType::SQLite))
        })
    }
}

fn collect_row<R, F>(row: &R, decode: F) -> SqlRow
where
    R: Row,
    usize: ColumnIndex<R>,
    F: Fn(&R, usize, &str) -> Option<JsonValue>,
{
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let value = decode(row, idx, col.type_info().name()).unwrap_or(JsonValue::Null);
            (col.name().to_owned(), value)
        })
        .collect()
}

/// Column `idx` as `T`; `None` when it is NULL or `T` does not fit.
fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn text<R>(row: &R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    String: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    get::<_, String>(row, idx).map(JsonValue::String)
}

fn binary<R>(row: &R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    Vec<u8>: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    get::<_, Vec<u8>>(row, idx).map(|bytes| decode_binary_value(&bytes))
}

fn timestamp<R>(row: &R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    NaiveDateTime: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    DateTime<Utc>: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    get::<_, NaiveDateTime>(row, idx)
        .map(|v| v.to_string())
        .or_else(|| get::<_, DateTime<Utc>>(row, idx).map(|v| v.to_rfc3339()))
        .map(JsonValue::String)
}

fn mysql_value(row: &MySqlRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
    match category {
        TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|d| JsonValue::String(d.0)),
        TypeCategory::Integer => get::<_, i64>(row, idx)
            .map(JsonValue::from)
            .or_else(|| get::<_, i32>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, u64>(row, idx).map(JsonValue::from)),
        TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float => get::<_, f64>(row, idx)
            .or_else(|| get::<_, f32>(row, idx).map(f64::from))
            .map(float_value),
        TypeCategory::Binary => binary(row, idx),
        TypeCategory::Json => get::<_, JsonValue>(row, idx),
        TypeCategory::Timestamp => timestamp(row, idx),
        TypeCategory::Text | TypeCategory::Unknown => text(row, idx),
    }
}

fn postgres_value(row: &PgRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
    match category {
        TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|d| JsonValue::String(d.0)),
        TypeCategory::Integer => get::<_, i64>(row, idx)
            .or_else(|| get::<_, i32>(row, idx).map(i64::from))
            .or_else(|| get::<_, i16>(row, idx).map(i64::from))
            .map(JsonValue::from),
        TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float => get::<_, f64>(row, idx)
            .or_else(|| get::<_, f32>(row, idx).map(f64::from))
            .map(float_value),
        TypeCategory::Binary => binary(row, idx),
        TypeCategory::Json => get::<_, JsonValue>(row, idx),
        TypeCategory::Timestamp => timestamp(row, idx),
        TypeCategory::Text | TypeCategory::Unknown => text(row, idx),
    }
}

fn sqlite_value(row: &SqliteRow, idx: usize, category: TypeCategory) -> Option<JsonValue> {
    match category {
        TypeCategory::Integer => get::<_, i64>(row, idx).map(JsonValue::from),
        TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float | TypeCategory::Decimal => get::<_, f64>(row, idx).map(float_value),
        TypeCategory::Binary => binary(row, idx),
        _ => text(row, idx),
    }
}

//! Column encoding.
//!
//! Everything that is not an integer is stored as TEXT: ids as hyphenated
//! UUIDs, enums as their snake_case names, decimals with their scale, JSON
//! maps as compact JSON, and timestamps in a fixed-width UTC form that
//! sorts the same way the instants do.

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::Row;
use stepwise_core::JsonMap;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

const TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z");

pub(crate) fn ts(value: OffsetDateTime) -> crate::Result<String> {
    Ok(value.to_offset(UtcOffset::UTC).format(TIMESTAMP)?)
}

pub(crate) fn ts_opt(value: Option<OffsetDateTime>) -> crate::Result<Option<String>> {
    value.map(ts).transpose()
}

pub(crate) fn json(map: &JsonMap) -> crate::Result<String> {
    Ok(serde_json::to_string(map)?)
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Parse a TEXT column through `FromStr` (ids, enums, decimals).
pub(crate) fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion(idx, e))
}

pub(crate) fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion(idx, e)))
        .transpose()
}

pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion(idx, e))
}

pub(crate) fn timestamp_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s).map_err(|e| conversion(idx, e)))
        .transpose()
}

pub(crate) fn json_map(row: &Row<'_>, idx: usize) -> rusqlite::Result<JsonMap> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion(idx, e))
}

fn parse_ts(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(raw, TIMESTAMP).map(PrimitiveDateTime::assume_utc)
}

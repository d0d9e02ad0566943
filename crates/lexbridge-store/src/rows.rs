//! Column decoding shared by the row mappers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use lexbridge_shared::error::ParseEnumError;
use lexbridge_shared::types::UserId;
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| conversion(idx, e))
}

pub(crate) fn user_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<UserId> {
    uuid_at(row, idx).map(UserId)
}

pub(crate) fn opt_user_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<UserId>> {
    opt_uuid_at(row, idx).map(|u| u.map(UserId))
}

pub(crate) fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| conversion(idx, e))
}

pub(crate) fn enum_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let s: String = row.get(idx)?;
    s.parse::<T>().map_err(|e| conversion(idx, e))
}

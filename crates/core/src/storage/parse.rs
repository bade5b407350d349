//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Error as SqlError;
use uuid::Uuid;

use crate::models::{CardValue, RoomCode, RoomStatus, RoundStatus};

fn conversion_error<E>(column: usize, err: E) -> SqlError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SqlError::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

#[derive(Debug)]
struct UnknownValue(String);

impl std::fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown stored value '{}'", self.0)
    }
}

impl std::error::Error for UnknownValue {}

/// Parse a UUID from a database string column
pub fn parse_uuid(s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(|e| conversion_error(0, e))
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(0, e))
}

/// Parse an optional DateTime from an RFC3339 string
pub fn parse_datetime_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>, SqlError> {
    s.map(|s| parse_datetime(&s)).transpose()
}

pub fn parse_room_code(s: String) -> Result<RoomCode, SqlError> {
    RoomCode::parse(&s).map_err(|e| conversion_error(0, e))
}

pub fn parse_room_status(s: &str) -> Result<RoomStatus, SqlError> {
    RoomStatus::parse(s).ok_or_else(|| conversion_error(0, UnknownValue(s.to_string())))
}

pub fn parse_round_status(s: &str) -> Result<RoundStatus, SqlError> {
    RoundStatus::parse(s).ok_or_else(|| conversion_error(0, UnknownValue(s.to_string())))
}

pub fn parse_card(value: u8) -> Result<CardValue, SqlError> {
    CardValue::new(value).map_err(|e| conversion_error(0, e))
}

//! SQLite helper utilities for type conversion
//!
//! SQLite has no native UUID, boolean or timestamp types. This module converts
//! between Rust types and the TEXT/INTEGER representations used in the schema.

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

// ============================================================================
// UUID Helpers
// ============================================================================

/// Convert a UUID to a SQLite-compatible string
#[inline]
pub fn uuid_to_str(id: Uuid) -> String {
    id.to_string()
}

/// Parse a SQLite string back to a UUID
#[inline]
pub fn str_to_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| anyhow!("Invalid UUID '{}': {}", s, e))
}

/// Parse an optional SQLite string to an optional UUID
#[inline]
pub fn str_to_uuid_opt(s: Option<&str>) -> Result<Option<Uuid>> {
    match s {
        Some(s) => Ok(Some(str_to_uuid(s)?)),
        None => Ok(None),
    }
}

// ============================================================================
// JSON Helpers (stored as TEXT in SQLite)
// ============================================================================

/// Serialize any serializable value to a JSON string
#[inline]
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Deserialize a JSON string to a value
#[inline]
pub fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| anyhow!("JSON parse error: {}", e))
}

// ============================================================================
// Timestamp Helpers (stored as fixed-width RFC 3339 TEXT in SQLite)
// ============================================================================

/// Convert a chrono DateTime to `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Every timestamp column uses this exact width so that comparing the TEXT
/// values in SQL orders them chronologically.
#[inline]
pub fn datetime_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Get current UTC timestamp in the stored format
#[inline]
pub fn now_iso8601() -> String {
    datetime_to_str(Utc::now())
}

/// Parse an ISO8601 string to DateTime
#[inline]
pub fn str_to_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Try parsing SQLite's datetime() format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .map_err(|e| anyhow!("Invalid datetime '{}': {}", s, e))
        })
}

/// Parse an optional datetime string
#[inline]
pub fn str_to_datetime_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match s {
        Some(s) if !s.is_empty() => Ok(Some(str_to_datetime(s)?)),
        _ => Ok(None),
    }
}

// ============================================================================
// Boolean Helpers (SQLite uses 0/1 integers)
// ============================================================================

/// Convert bool to SQLite integer (0 or 1)
#[inline]
pub fn bool_to_int(b: bool) -> i32 {
    if b { 1 } else { 0 }
}

/// Convert SQLite integer to bool
#[inline]
pub fn int_to_bool(i: i32) -> bool {
    i != 0
}

/// Map a conversion failure into the error type expected by `FromRow`
pub(crate) fn decode_err(e: anyhow::Error) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}

//! Typed accessors over [`Item`] attributes used by entity mappings.

use chrono::{DateTime, Utc};

use super::error::{StoreError, StoreResult};
use super::types::{AttrValue, Item};

/// Get a required string attribute.
pub fn get_string(item: &Item, key: &str) -> StoreResult<String> {
    item.get(key)
        .and_then(AttrValue::as_s)
        .map(|s| s.to_string())
        .ok_or_else(|| StoreError::InvalidData(format!("Missing or invalid field: {}", key)))
}

/// Get an optional string attribute.
pub fn get_optional_string(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(AttrValue::as_s).map(|s| s.to_string())
}

/// Get a boolean attribute, falling back to `default` when absent.
pub fn get_bool(item: &Item, key: &str, default: bool) -> StoreResult<bool> {
    match item.get(key) {
        None | Some(AttrValue::Null) => Ok(default),
        Some(value) => value.as_bool().ok_or_else(|| {
            StoreError::InvalidData(format!(
                "Invalid field {}: expected BOOL, got {}",
                key,
                value.type_tag()
            ))
        }),
    }
}

/// Get a required datetime attribute (RFC 3339 format).
pub fn get_datetime(item: &Item, key: &str) -> StoreResult<DateTime<Utc>> {
    let s = get_string(item, key)?;
    parse_datetime(key, &s)
}

/// Get an optional datetime attribute (RFC 3339 format).
pub fn get_optional_datetime(item: &Item, key: &str) -> StoreResult<Option<DateTime<Utc>>> {
    get_optional_string(item, key)
        .map(|s| parse_datetime(key, &s))
        .transpose()
}

fn parse_datetime(key: &str, s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("Invalid datetime {}: {}", key, e)))
}

/// Insert a datetime attribute in RFC 3339 format.
pub fn put_datetime(item: &mut Item, key: &str, value: DateTime<Utc>) {
    item.insert(key.to_string(), AttrValue::S(value.to_rfc3339()));
}

/// Insert an optional string attribute; `None` leaves the attribute out.
pub fn put_optional_string(item: &mut Item, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        item.insert(key.to_string(), AttrValue::S(value.to_string()));
    }
}

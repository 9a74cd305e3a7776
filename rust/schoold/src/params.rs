//! Field readers shared by request params and report filters.

use crate::error::{CoreError, CoreResult};

/// Trimmed, non-empty string field.
pub fn opt_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn required_str<'a>(params: &'a serde_json::Value, key: &str) -> CoreResult<&'a str> {
    opt_str(params, key).ok_or_else(|| CoreError::bad_params(format!("missing {}", key)))
}

/// Non-negative integer field; absent or null falls back to `default`.
pub fn opt_count(params: &serde_json::Value, key: &str, default: usize) -> CoreResult<usize> {
    match params.get(key) {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| CoreError::bad_params(format!("{} must be a non-negative integer", key))),
    }
}

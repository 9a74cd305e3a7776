use crate::error::CoreError;
use log::warn;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn core_err(id: &str, e: CoreError) -> serde_json::Value {
    if let CoreError::Store(inner) = &e {
        warn!("request {} failed in store: {}", id, inner);
    }
    err(id, e.code(), e.to_string(), None)
}

/// Wraps a handler outcome in the response envelope.
pub fn respond<T: serde::Serialize>(id: &str, result: Result<T, CoreError>) -> serde_json::Value {
    match result {
        Ok(v) => match serde_json::to_value(v) {
            Ok(value) => ok(id, value),
            Err(e) => err(id, "internal", e.to_string(), None),
        },
        Err(e) => core_err(id, e),
    }
}

use crate::error::{CoreError, CoreResult};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::model::{Actor, Role};
pub use crate::params::{opt_str, required_str};
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_bool(params: &serde_json::Value, key: &str) -> CoreResult<bool> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| CoreError::bad_params(format!("missing {}", key)))
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> CoreResult<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| CoreError::bad_params(format!("{} must be an integer", key)))
}

/// The caller has already authenticated the actor; only the shape is checked here.
pub fn parse_actor(params: &serde_json::Value) -> CoreResult<Actor> {
    let Some(raw) = params.get("actor") else {
        return Err(CoreError::bad_params("missing actor"));
    };
    let id = required_str(raw, "id").map_err(|_| CoreError::bad_params("missing actor.id"))?;
    let role = required_str(raw, "role")
        .map_err(|_| CoreError::bad_params("missing actor.role"))?
        .parse::<Role>()
        .map_err(CoreError::bad_params)?;
    Ok(Actor::new(id, role))
}

pub fn require_admin(actor: &Actor) -> CoreResult<()> {
    if actor.role != Role::Administrator {
        return Err(CoreError::Forbidden(format!(
            "{} may not change the roster",
            actor.role
        )));
    }
    Ok(())
}

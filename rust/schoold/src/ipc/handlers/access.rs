use crate::access::{ScopeFilter, TargetKind, VisibilityResolver};
use crate::error::{CoreError, CoreResult};
use crate::graph::StoreGraph;
use crate::ipc::error::respond;
use crate::ipc::helpers::{db_conn, opt_str, parse_actor, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn access_resolve(conn: &Connection, params: &serde_json::Value) -> CoreResult<serde_json::Value> {
    let actor = parse_actor(params)?;
    let kind = required_str(params, "targetKind")?
        .parse::<TargetKind>()
        .map_err(CoreError::bad_params)?;
    let target_id = required_str(params, "targetId")?;

    let tx = conn.unchecked_transaction()?;
    let graph = StoreGraph::new(&tx);
    let access = VisibilityResolver::new(&graph).resolve_access(&actor, kind, target_id)?;
    Ok(json!({
        "targetKind": kind.as_str(),
        "targetId": target_id,
        "access": access,
    }))
}

fn access_scope(conn: &Connection, params: &serde_json::Value) -> CoreResult<serde_json::Value> {
    let actor = parse_actor(params)?;
    let filter = ScopeFilter {
        group_id: opt_str(params, "groupId").map(str::to_string),
        course_id: opt_str(params, "courseId").map(str::to_string),
    };

    let tx = conn.unchecked_transaction()?;
    let graph = StoreGraph::new(&tx);
    let scope = VisibilityResolver::new(&graph).resolve_scope(&actor, &filter)?;
    Ok(json!({
        "count": scope.len(),
        "studentIds": scope,
    }))
}

fn handle_access_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    respond(&req.id, access_resolve(conn, &req.params))
}

fn handle_access_scope(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    respond(&req.id, access_scope(conn, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "access.resolve" => Some(handle_access_resolve(state, req)),
        "access.scope" => Some(handle_access_scope(state, req)),
        _ => None,
    }
}

use crate::error::{CoreError, CoreResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{db_conn, parse_actor, required_str};
use crate::ipc::types::{AppState, Request};
use crate::reports::{compose_report, Report, ReportKind};
use rusqlite::Connection;
use serde_json::json;

fn reports_compose(conn: &Connection, params: &serde_json::Value, top_n: usize) -> CoreResult<Report> {
    let actor = parse_actor(params)?;
    let kind = required_str(params, "reportKind")?
        .parse::<ReportKind>()
        .map_err(CoreError::bad_params)?;
    let empty = json!({});
    let filters = params.get("filters").unwrap_or(&empty);
    if !filters.is_object() {
        return Err(CoreError::bad_params("filters must be an object"));
    }

    // One read transaction: every relation lookup sees the same snapshot.
    let tx = conn.unchecked_transaction()?;
    compose_report(&tx, &actor, kind, filters, top_n)
}

fn handle_reports_compose(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    respond(&req.id, reports_compose(conn, &req.params, state.top_n))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.compose" => Some(handle_reports_compose(state, req)),
        _ => None,
    }
}

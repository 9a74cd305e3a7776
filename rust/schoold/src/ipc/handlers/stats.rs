use crate::error::{CoreError, CoreResult};
use crate::ipc::error::respond;
use crate::ipc::types::{AppState, Request};
use crate::model::{AbsenceRecord, GradeRecord, GRADE_MAX, GRADE_MIN};
use crate::params::{opt_count, required_str};
use crate::roster::validate_hours;
use crate::stats::{aggregate_absences, aggregate_grades, AggregatePolicy};
use serde_json::json;

fn parse_records<T: serde::de::DeserializeOwned>(params: &serde_json::Value) -> CoreResult<Vec<T>> {
    let Some(raw) = params.get("records") else {
        return Err(CoreError::bad_params("missing records"));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| CoreError::bad_params(format!("invalid records: {}", e)))
}

/// Rolls up caller-supplied records; no store access and no visibility rules.
fn stats_aggregate(params: &serde_json::Value, default_top_n: usize) -> CoreResult<serde_json::Value> {
    let top_n = opt_count(params, "topN", default_top_n)?;
    let policy = AggregatePolicy { top_n };

    match required_str(params, "kind")? {
        "grades" => {
            let records: Vec<GradeRecord> = parse_records(params)?;
            if let Some(bad) = records
                .iter()
                .find(|g| !(GRADE_MIN..=GRADE_MAX).contains(&g.value))
            {
                return Err(CoreError::bad_params(format!(
                    "grade value {} out of range",
                    bad.value
                )));
            }
            Ok(json!({ "kind": "grades", "stats": aggregate_grades(&records, policy) }))
        }
        "absences" => {
            let records: Vec<AbsenceRecord> = parse_records(params)?;
            for a in &records {
                validate_hours(a.hours)?;
            }
            Ok(json!({ "kind": "absences", "stats": aggregate_absences(&records, policy) }))
        }
        other => Err(CoreError::bad_params(format!("unknown kind: {}", other))),
    }
}

fn handle_stats_aggregate(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, stats_aggregate(&req.params, state.top_n))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.aggregate" => Some(handle_stats_aggregate(state, req)),
        _ => None,
    }
}

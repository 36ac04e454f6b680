use crate::calc::{self, ApprovalStatus};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_required_month, get_required_str, get_required_year, now_timestamp, require_admin,
    require_db, Actor,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

fn parse_record_type(params: &serde_json::Value) -> Result<&'static str, HandlerErr> {
    let raw = get_required_str(params, "recordType")?;
    match raw.as_str() {
        "local" => Ok("local"),
        "non_local" => Ok("non_local"),
        other => Err(HandlerErr::with_details(
            "bad_params",
            "recordType must be local or non_local",
            json!({ "recordType": other }),
        )),
    }
}

fn load_approvals(
    conn: &Connection,
    record_type: &str,
    year: i64,
) -> Result<HashMap<(String, u32), ApprovalStatus>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT record_id, month, status FROM monthly_approvals
             WHERE record_type = ? AND reporting_year = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map((record_type, year), |r| {
            let record_id: String = r.get(0)?;
            let month: i64 = r.get(1)?;
            let status: String = r.get(2)?;
            Ok((record_id, month, status))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut map = HashMap::new();
    for (record_id, month, status) in rows {
        if !(1..=12).contains(&month) {
            continue;
        }
        // Unknown status strings are skipped rather than crashing the view.
        if let Some(parsed) = ApprovalStatus::parse(&status) {
            map.insert((record_id, month as u32), parsed);
        }
    }
    Ok(map)
}

fn list_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let record_type = parse_record_type(&req.params)?;
    let year = get_required_year(&req.params)?;

    let records: Vec<(String, String, String, String)> = if record_type == "local" {
        let mut stmt = conn
            .prepare(
                "SELECT lr.id, lr.sk_user_id, p.full_name, v.name
                 FROM local_records lr
                 JOIN profiles p ON p.user_id = lr.sk_user_id
                 JOIN villages v ON v.id = lr.village_id
                 WHERE lr.reporting_year = ?
                 ORDER BY lr.created_at",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([year], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    } else {
        let mut stmt = conn
            .prepare(
                "SELECT nr.id, nr.sk_user_id, p.full_name,
                        nr.country || ' - ' || nr.village_name
                 FROM non_local_records nr
                 JOIN profiles p ON p.user_id = nr.sk_user_id
                 WHERE nr.reporting_year = ?
                 ORDER BY nr.created_at",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([year], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };

    let approvals = load_approvals(conn, record_type, year)?;

    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|(id, sk_user_id, sk_name, location)| {
            let months: Vec<serde_json::Value> = (1..=12_u32)
                .map(|month| {
                    let entry = approvals.get(&(id.clone(), month)).copied();
                    json!({
                        "month": month,
                        "status": calc::cell_status(entry),
                    })
                })
                .collect();
            json!({
                "id": id,
                "recordType": record_type,
                "skUserId": sk_user_id,
                "skName": sk_name,
                "location": location,
                "reportingYear": year,
                "months": months,
            })
        })
        .collect();

    Ok(json!({
        "recordType": record_type,
        "year": year,
        "rows": rows,
    }))
}

fn record_exists(
    conn: &Connection,
    record_type: &str,
    record_id: &str,
    year: i64,
) -> Result<bool, HandlerErr> {
    let sql = if record_type == "local" {
        "SELECT 1 FROM local_records WHERE id = ? AND reporting_year = ?"
    } else {
        "SELECT 1 FROM non_local_records WHERE id = ? AND reporting_year = ?"
    };
    conn.query_row(sql, (record_id, year), |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}

fn upsert_approval(
    conn: &Connection,
    actor: &Actor,
    record_type: &str,
    record_id: &str,
    year: i64,
    month: u32,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO monthly_approvals(
            record_type, record_id, reporting_year, month, status, approved_by, approved_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(record_type, record_id, reporting_year, month) DO UPDATE SET
           status = excluded.status,
           approved_by = excluded.approved_by,
           approved_at = excluded.approved_at",
        (
            record_type,
            record_id,
            year,
            month,
            ApprovalStatus::Approved.as_str(),
            &actor.user_id,
            now_timestamp(),
        ),
    )
    .map_err(HandlerErr::db_insert)?;
    Ok(())
}

fn approve_month_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_admin(req)?;
    let record_type = parse_record_type(&req.params)?;
    let record_id = get_required_str(&req.params, "recordId")?;
    let year = get_required_year(&req.params)?;
    let month = get_required_month(&req.params)?;

    if !record_exists(conn, record_type, &record_id, year)? {
        return Err(HandlerErr::new("not_found", "record not found"));
    }

    upsert_approval(conn, &actor, record_type, &record_id, year, month)?;
    Ok(json!({
        "recordId": record_id,
        "month": month,
        "status": ApprovalStatus::Approved.as_str(),
    }))
}

/// Twelve sequential upserts, months 1..12. There is no atomicity across
/// them: a failure at month k stops the loop and the response names the
/// months that were already approved.
fn approve_all_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_admin(req)?;
    let record_type = parse_record_type(&req.params)?;
    let record_id = get_required_str(&req.params, "recordId")?;
    let year = get_required_year(&req.params)?;

    if !record_exists(conn, record_type, &record_id, year)? {
        return Err(HandlerErr::new("not_found", "record not found"));
    }

    let mut approved_months: Vec<u32> = Vec::with_capacity(12);
    let mut failure: Option<(u32, HandlerErr)> = None;
    for month in 1..=12_u32 {
        match upsert_approval(conn, &actor, record_type, &record_id, year, month) {
            Ok(()) => approved_months.push(month),
            Err(e) => {
                failure = Some((month, e));
                break;
            }
        }
    }

    let mut result = json!({
        "recordId": record_id,
        "approvedMonths": approved_months,
    });
    if let Some((month, e)) = failure {
        result["failedMonth"] = json!(month);
        result["error"] = json!({ "code": e.code, "message": e.message });
    }
    Ok(result)
}

fn respond(
    req: &Request,
    result: Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "review.list" => Some(respond(req, list_inner(state, req))),
        "review.approveMonth" => Some(respond(req, approve_month_inner(state, req))),
        "review.approveAll" => Some(respond(req, approve_all_inner(state, req))),
        _ => None,
    }
}

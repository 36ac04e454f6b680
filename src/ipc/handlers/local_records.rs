use crate::calc::{self, Role, MONTH_COLUMNS, MONTH_LABELS};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_required_year, is_month_column, month_select_list, months_from_row, new_id, now_timestamp,
    require_actor, require_admin, require_db, Actor,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;

const SAVE_MAX_EDITS: usize = 500;

/// Per-year admin fields on a Local record. Month windows never apply to
/// these; only the admin role does.
const ADMIN_ONLY_FIELDS: [&str; 5] = ["hh", "population", "itn_2023", "itn_2024", "itn_2025"];

struct LocalRow {
    id: String,
    sk_user_id: String,
    sk_name: String,
    village_id: String,
    village_name: String,
    ward_no: Option<String>,
    union_name: String,
    upazila_name: String,
    district_name: String,
    reporting_year: i64,
    hh: i64,
    population: i64,
    itn_2023: i64,
    itn_2024: i64,
    itn_2025: i64,
    months: [i64; 12],
}

fn list_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_actor(req)?;
    let year = get_required_year(&req.params)?;

    let now = calc::dhaka_now();
    let current_year = calc::dhaka_year(&now);
    let current_month = calc::dhaka_month(&now);

    let mut sql = format!(
        "SELECT lr.id, lr.sk_user_id, p.full_name, lr.village_id, v.name, v.ward_no,
                un.name, up.name, d.name, lr.reporting_year,
                lr.hh, lr.population, lr.itn_2023, lr.itn_2024, lr.itn_2025, {}
         FROM local_records lr
         JOIN villages v ON v.id = lr.village_id
         JOIN unions un ON un.id = v.union_id
         JOIN upazilas up ON up.id = un.upazila_id
         JOIN districts d ON d.id = up.district_id
         JOIN profiles p ON p.user_id = lr.sk_user_id
         WHERE lr.reporting_year = ?",
        month_select_list("lr.")
    );
    let mut binds: Vec<Value> = vec![Value::Integer(year)];
    if actor.role != Role::Admin {
        sql.push_str(" AND lr.sk_user_id = ?");
        binds.push(Value::Text(actor.user_id.clone()));
    }
    sql.push_str(" ORDER BY lr.created_at");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let rows: Vec<LocalRow> = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(LocalRow {
                id: r.get(0)?,
                sk_user_id: r.get(1)?,
                sk_name: r.get(2)?,
                village_id: r.get(3)?,
                village_name: r.get(4)?,
                ward_no: r.get(5)?,
                union_name: r.get(6)?,
                upazila_name: r.get(7)?,
                district_name: r.get(8)?,
                reporting_year: r.get(9)?,
                hh: r.get(10)?,
                population: r.get(11)?,
                itn_2023: r.get(12)?,
                itn_2024: r.get(13)?,
                itn_2025: r.get(14)?,
                months: months_from_row(r, 15)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let rows_json: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            let months: Vec<serde_json::Value> = MONTH_COLUMNS
                .iter()
                .enumerate()
                .map(|(idx, col)| {
                    let value = row.months[idx];
                    json!({
                        "column": col,
                        "label": MONTH_LABELS[idx],
                        "value": value,
                        "editable": calc::is_month_editable(
                            actor.role,
                            row.reporting_year,
                            current_year,
                            current_month,
                            idx,
                        ),
                        "status": calc::month_status(
                            value,
                            idx,
                            actor.role,
                            row.reporting_year,
                            current_year,
                            current_month,
                        ),
                    })
                })
                .collect();
            json!({
                "id": row.id,
                "skUserId": row.sk_user_id,
                "skName": row.sk_name,
                "villageId": row.village_id,
                "village": row.village_name,
                "ward": row.ward_no,
                "union": row.union_name,
                "upazila": row.upazila_name,
                "district": row.district_name,
                "reportingYear": row.reporting_year,
                "hh": row.hh,
                "population": row.population,
                "itn2023": row.itn_2023,
                "itn2024": row.itn_2024,
                "itn2025": row.itn_2025,
                "months": months,
                "total": calc::month_total(&row.months),
            })
        })
        .collect();

    Ok(json!({
        "year": year,
        "currentYear": current_year,
        "currentMonth": current_month,
        "rows": rows_json,
    }))
}

/// One edit is one record's full-or-partial field set, applied as a single
/// UPDATE. Edits are independent of each other: a bad edit is rejected
/// whole (no partial field write) and the rest of the batch continues.
fn save_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_actor(req)?;
    let Some(edits) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing edits[]"));
    };
    if edits.len() > SAVE_MAX_EDITS {
        return Err(HandlerErr::with_details(
            "bad_params",
            "save payload exceeds max edits",
            json!({ "edits": edits.len(), "max": SAVE_MAX_EDITS }),
        ));
    }

    let mut updated: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, edit) in edits.iter().enumerate() {
        match apply_edit(conn, &actor, edit) {
            Ok(()) => updated += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "id": edit.get("id").and_then(|v| v.as_str()),
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    let mut result = json!({ "updated": updated });
    if !errors.is_empty() {
        result["rejected"] = json!(errors.len());
        result["errors"] = json!(errors);
    }
    Ok(result)
}

fn apply_edit(
    conn: &rusqlite::Connection,
    actor: &Actor,
    edit: &serde_json::Value,
) -> Result<(), HandlerErr> {
    let Some(obj) = edit.as_object() else {
        return Err(HandlerErr::new("bad_params", "edit must be an object"));
    };
    let Some(record_id) = obj.get("id").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("bad_params", "edit missing id"));
    };

    let mut set_cols: Vec<&str> = Vec::new();
    let mut set_vals: Vec<Value> = Vec::new();
    for (key, raw) in obj {
        if key.as_str() == "id" {
            continue;
        }
        let is_admin_field = ADMIN_ONLY_FIELDS.contains(&key.as_str());
        if !is_month_column(key) && !is_admin_field {
            return Err(HandlerErr::with_details(
                "bad_params",
                "unknown field",
                json!({ "field": key }),
            ));
        }
        if is_admin_field && actor.role != Role::Admin {
            return Err(HandlerErr::with_details(
                "forbidden",
                "field is admin-only",
                json!({ "field": key }),
            ));
        }
        let value = calc::parse_case_value(raw)?;
        set_cols.push(key.as_str());
        set_vals.push(Value::Integer(value));
    }
    if set_cols.is_empty() {
        return Err(HandlerErr::new("bad_params", "edit has no fields"));
    }

    let set_clause = set_cols
        .iter()
        .map(|c| format!("{} = ?", c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "UPDATE local_records SET {}, updated_at = ? WHERE id = ?",
        set_clause
    );
    set_vals.push(Value::Text(now_timestamp()));
    set_vals.push(Value::Text(record_id.to_string()));
    if actor.role != Role::Admin {
        sql.push_str(" AND sk_user_id = ?");
        set_vals.push(Value::Text(actor.user_id.clone()));
    }

    let affected = conn
        .execute(&sql, params_from_iter(set_vals))
        .map_err(HandlerErr::db_insert)?;
    if affected == 0 {
        return Err(HandlerErr::new("not_found", "record not found"));
    }
    Ok(())
}

/// Opens a reporting year: every assignment gets its Local record row for
/// that year if one does not exist yet. Idempotent.
fn open_year_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let year = get_required_year(&req.params)?;

    let mut stmt = conn
        .prepare("SELECT sk_user_id, village_id FROM assignments ORDER BY created_at")
        .map_err(HandlerErr::db_query)?;
    let pairs: Vec<(String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let now = now_timestamp();
    let mut created: usize = 0;
    for (sk_user_id, village_id) in &pairs {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO local_records(
                    id, sk_user_id, village_id, reporting_year, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (new_id(), sk_user_id, village_id, year, &now, &now),
            )
            .map_err(HandlerErr::db_insert)?;
        created += inserted;
    }

    Ok(json!({
        "year": year,
        "assignments": pairs.len(),
        "created": created,
    }))
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
        "records.local.list" => Some(respond(req, list_inner(state, req))),
        "records.local.save" => Some(respond(req, save_inner(state, req))),
        "records.local.openYear" => Some(respond(req, open_year_inner(state, req))),
        _ => None,
    }
}

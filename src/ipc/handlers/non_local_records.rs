use crate::calc::{self, Role, MONTH_COLUMNS, MONTH_LABELS};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    check_year_range, get_required_year, is_month_column, month_select_list, months_from_row,
    new_id, now_timestamp, require_actor, require_db, Actor,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

/// Free-text location fields on a NonLocal record, wire key and column.
/// The wire keys match what `list` emits, so a listed row can be sent back
/// as an update unchanged. Not month-gated; locked for reporters once any
/// month of the record is approved.
const TEXT_FIELDS: [(&str, &str); 5] = [
    ("country", "country"),
    ("districtOrState", "district_or_state"),
    ("upazilaOrTownship", "upazila_or_township"),
    ("unionName", "union_name"),
    ("villageName", "village_name"),
];

struct NonLocalRow {
    id: String,
    sk_user_id: String,
    sk_name: String,
    reporting_year: i64,
    country: String,
    district_or_state: String,
    upazila_or_township: String,
    union_name: String,
    village_name: String,
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
        "SELECT nr.id, nr.sk_user_id, p.full_name, nr.reporting_year,
                nr.country, nr.district_or_state, nr.upazila_or_township,
                nr.union_name, nr.village_name, {}
         FROM non_local_records nr
         JOIN profiles p ON p.user_id = nr.sk_user_id
         WHERE nr.reporting_year = ?",
        month_select_list("nr.")
    );
    let mut binds: Vec<Value> = vec![Value::Integer(year)];
    if actor.role != Role::Admin {
        sql.push_str(" AND nr.sk_user_id = ?");
        binds.push(Value::Text(actor.user_id.clone()));
    }
    sql.push_str(" ORDER BY nr.created_at");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let rows: Vec<NonLocalRow> = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(NonLocalRow {
                id: r.get(0)?,
                sk_user_id: r.get(1)?,
                sk_name: r.get(2)?,
                reporting_year: r.get(3)?,
                country: r.get(4)?,
                district_or_state: r.get(5)?,
                upazila_or_township: r.get(6)?,
                union_name: r.get(7)?,
                village_name: r.get(8)?,
                months: months_from_row(r, 9)?,
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
                "reportingYear": row.reporting_year,
                "country": row.country,
                "districtOrState": row.district_or_state,
                "upazilaOrTownship": row.upazila_or_township,
                "unionName": row.union_name,
                "villageName": row.village_name,
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

/// Deletes run first, then inserts, then updates; every write is an
/// independent request against the store and failures never roll back the
/// writes already applied.
fn save_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_actor(req)?;

    let empty = Vec::new();
    let deletes = req
        .params
        .get("deletes")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);
    let inserts = req
        .params
        .get("inserts")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);
    let updates = req
        .params
        .get("updates")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let mut deleted: usize = 0;
    let mut inserted: usize = 0;
    let mut updated: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for raw in deletes {
        let Some(id) = raw.as_str() else {
            errors.push(json!({
                "op": "delete",
                "code": "bad_params",
                "message": "delete entry must be a record id",
            }));
            continue;
        };
        match delete_record(conn, &actor, id) {
            Ok(()) => deleted += 1,
            Err(e) => errors.push(json!({
                "op": "delete",
                "id": id,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    for raw in inserts {
        match insert_record(conn, &actor, raw) {
            Ok(_) => inserted += 1,
            Err(e) => errors.push(json!({
                "op": "insert",
                "id": raw.get("id").and_then(|v| v.as_str()),
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    for raw in updates {
        match update_record(conn, &actor, raw) {
            Ok(()) => updated += 1,
            Err(e) => errors.push(json!({
                "op": "update",
                "id": raw.get("id").and_then(|v| v.as_str()),
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    let mut result = json!({
        "deleted": deleted,
        "inserted": inserted,
        "updated": updated,
    });
    if !errors.is_empty() {
        result["rejected"] = json!(errors.len());
        result["errors"] = json!(errors);
    }
    Ok(result)
}

fn has_approved_month(conn: &Connection, record_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM monthly_approvals
         WHERE record_type = 'non_local' AND record_id = ? AND status = 'APPROVED'
         LIMIT 1",
        [record_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn delete_record(conn: &Connection, actor: &Actor, id: &str) -> Result<(), HandlerErr> {
    if actor.role != Role::Admin && has_approved_month(conn, id)? {
        return Err(HandlerErr::new(
            "conflict",
            "record has approved months and cannot be deleted",
        ));
    }

    let mut sql = "DELETE FROM non_local_records WHERE id = ?".to_string();
    let mut binds: Vec<Value> = vec![Value::Text(id.to_string())];
    if actor.role != Role::Admin {
        sql.push_str(" AND sk_user_id = ?");
        binds.push(Value::Text(actor.user_id.clone()));
    }
    let affected = conn
        .execute(&sql, params_from_iter(binds))
        .map_err(HandlerErr::db_insert)?;
    if affected == 0 {
        return Err(HandlerErr::new("not_found", "record not found"));
    }
    Ok(())
}

fn insert_record(
    conn: &Connection,
    actor: &Actor,
    raw: &serde_json::Value,
) -> Result<String, HandlerErr> {
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::new("bad_params", "insert must be an object"));
    };

    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(new_id);

    // Reporters always insert rows they own.
    let sk_user_id = if actor.role == Role::Admin {
        obj.get("skUserId")
            .and_then(|v| v.as_str())
            .unwrap_or(actor.user_id.as_str())
            .to_string()
    } else {
        actor.user_id.clone()
    };

    let reporting_year = obj
        .get("reportingYear")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "insert missing reportingYear"))?;
    check_year_range(reporting_year)?;

    let mut text_values: Vec<String> = Vec::with_capacity(TEXT_FIELDS.len());
    for (key, _) in TEXT_FIELDS {
        let value = obj
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(if key == "country" { "Bangladesh" } else { "" });
        text_values.push(value.to_string());
    }

    let mut months = [0_i64; 12];
    for (idx, col) in MONTH_COLUMNS.iter().enumerate() {
        if let Some(raw_value) = obj.get(*col) {
            months[idx] = calc::parse_case_value(raw_value)?;
        }
    }

    let now = now_timestamp();
    let sql = format!(
        "INSERT INTO non_local_records(
            id, sk_user_id, reporting_year,
            country, district_or_state, upazila_or_township, union_name, village_name,
            {}, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        MONTH_COLUMNS.join(", ")
    );
    let mut binds: Vec<Value> = vec![
        Value::Text(id.clone()),
        Value::Text(sk_user_id),
        Value::Integer(reporting_year),
    ];
    for v in text_values {
        binds.push(Value::Text(v));
    }
    for m in months {
        binds.push(Value::Integer(m));
    }
    binds.push(Value::Text(now.clone()));
    binds.push(Value::Text(now));

    conn.execute(&sql, params_from_iter(binds))
        .map_err(HandlerErr::db_insert)?;
    Ok(id)
}

fn update_record(
    conn: &Connection,
    actor: &Actor,
    raw: &serde_json::Value,
) -> Result<(), HandlerErr> {
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::new("bad_params", "update must be an object"));
    };
    let Some(record_id) = obj.get("id").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("bad_params", "update missing id"));
    };

    let mut set_cols: Vec<String> = Vec::new();
    let mut set_vals: Vec<Value> = Vec::new();
    let mut touches_text = false;
    for (key, value) in obj {
        if key.as_str() == "id" {
            continue;
        }
        if is_month_column(key) {
            set_cols.push(format!("{} = ?", key));
            set_vals.push(Value::Integer(calc::parse_case_value(value)?));
        } else if let Some((_, column)) = TEXT_FIELDS.iter().find(|(k, _)| *k == key.as_str()) {
            let Some(s) = value.as_str() else {
                return Err(HandlerErr::with_details(
                    "bad_params",
                    "location field must be a string",
                    json!({ "field": key }),
                ));
            };
            touches_text = true;
            set_cols.push(format!("{} = ?", column));
            set_vals.push(Value::Text(s.to_string()));
        } else {
            return Err(HandlerErr::with_details(
                "bad_params",
                "unknown field",
                json!({ "field": key }),
            ));
        }
    }
    if set_cols.is_empty() {
        return Err(HandlerErr::new("bad_params", "update has no fields"));
    }

    // Location text stays editable for the owner until a month of the
    // record is approved.
    if touches_text && actor.role != Role::Admin && has_approved_month(conn, record_id)? {
        return Err(HandlerErr::new(
            "conflict",
            "record is approved-locked; location fields are frozen",
        ));
    }

    let mut sql = format!(
        "UPDATE non_local_records SET {}, updated_at = ? WHERE id = ?",
        set_cols.join(", ")
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
        "records.nonLocal.list" => Some(respond(req, list_inner(state, req))),
        "records.nonLocal.save" => Some(respond(req, save_inner(state, req))),
        _ => None,
    }
}

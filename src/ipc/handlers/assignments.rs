use crate::calc;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, new_id, now_timestamp, require_admin, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn list_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.sk_user_id, p.full_name, a.village_id, v.name,
                    un.name, up.name, d.name, a.created_at
             FROM assignments a
             JOIN profiles p ON p.user_id = a.sk_user_id
             JOIN villages v ON v.id = a.village_id
             JOIN unions un ON un.id = v.union_id
             JOIN upazilas up ON up.id = un.upazila_id
             JOIN districts d ON d.id = up.district_id
             ORDER BY a.created_at",
        )
        .map_err(HandlerErr::db_query)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "skUserId": r.get::<_, String>(1)?,
                "skName": r.get::<_, String>(2)?,
                "villageId": r.get::<_, String>(3)?,
                "village": r.get::<_, String>(4)?,
                "union": r.get::<_, String>(5)?,
                "upazila": r.get::<_, String>(6)?,
                "district": r.get::<_, String>(7)?,
                "createdAt": r.get::<_, String>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "rows": rows }))
}

fn user_role(conn: &Connection, user_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT role FROM user_roles WHERE user_id = ?",
        [user_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

fn create_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let sk_user_id = get_required_str(&req.params, "skUserId")?;
    let village_id = get_required_str(&req.params, "villageId")?;

    match user_role(conn, &sk_user_id)? {
        None => return Err(HandlerErr::new("not_found", "user not found")),
        Some(role) if role != "sk" => {
            return Err(HandlerErr::with_details(
                "bad_params",
                "user is not a reporter",
                json!({ "role": role }),
            ));
        }
        Some(_) => {}
    }

    let village_exists = conn
        .query_row("SELECT 1 FROM villages WHERE id = ?", [&village_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !village_exists {
        return Err(HandlerErr::new("not_found", "village not found"));
    }

    let duplicate = conn
        .query_row(
            "SELECT 1 FROM assignments WHERE sk_user_id = ? AND village_id = ?",
            (&sk_user_id, &village_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if duplicate {
        return Err(HandlerErr::new(
            "conflict",
            "village is already assigned to this reporter",
        ));
    }

    let id = new_id();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO assignments(id, sk_user_id, village_id, created_at)
         VALUES(?, ?, ?, ?)",
        (&id, &sk_user_id, &village_id, &now),
    )
    .map_err(HandlerErr::db_insert)?;

    // Assignment opens the current reporting year for the reporter.
    let year = calc::dhaka_year(&calc::dhaka_now());
    let record_created = conn
        .execute(
            "INSERT OR IGNORE INTO local_records(
                id, sk_user_id, village_id, reporting_year, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (new_id(), &sk_user_id, &village_id, year, &now, &now),
        )
        .map_err(HandlerErr::db_insert)?;

    Ok(json!({
        "id": id,
        "skUserId": sk_user_id,
        "villageId": village_id,
        "recordYear": year,
        "recordCreated": record_created > 0,
    }))
}

fn delete_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let id = get_required_str(&req.params, "id")?;

    let affected = conn
        .execute("DELETE FROM assignments WHERE id = ?", [&id])
        .map_err(HandlerErr::db_insert)?;
    if affected == 0 {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    }
    // Existing Local records stay; they are never hard-deleted.
    Ok(json!({ "id": id }))
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
        "assignments.list" => Some(respond(req, list_inner(state, req))),
        "assignments.create" => Some(respond(req, create_inner(state, req))),
        "assignments.delete" => Some(respond(req, delete_inner(state, req))),
        _ => None,
    }
}

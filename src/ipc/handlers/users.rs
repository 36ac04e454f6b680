use crate::calc::Role;
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
            "SELECT p.user_id, p.full_name, p.email, r.role, p.created_at
             FROM profiles p
             LEFT JOIN user_roles r ON r.user_id = p.user_id
             ORDER BY p.created_at",
        )
        .map_err(HandlerErr::db_query)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            Ok(json!({
                "userId": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "role": r.get::<_, Option<String>>(3)?,
                "createdAt": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "rows": rows }))
}

fn create_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let full_name = get_required_str(&req.params, "fullName")?;
    let email = get_required_str(&req.params, "email")?;
    let role_raw = get_required_str(&req.params, "role")?;

    if full_name.trim().is_empty() || email.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "fullName and email are required"));
    }
    let Some(role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::with_details(
            "bad_params",
            "role must be admin or sk",
            json!({ "role": role_raw }),
        ));
    };

    let duplicate = conn
        .query_row("SELECT 1 FROM profiles WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if duplicate {
        return Err(HandlerErr::new("conflict", "a user with this email exists"));
    }

    let user_id = new_id();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO profiles(user_id, full_name, email, created_at) VALUES(?, ?, ?, ?)",
        (&user_id, &full_name, &email, &now),
    )
    .map_err(HandlerErr::db_insert)?;
    conn.execute(
        "INSERT INTO user_roles(user_id, role) VALUES(?, ?)",
        (&user_id, role.as_str()),
    )
    .map_err(HandlerErr::db_insert)?;

    Ok(json!({
        "userId": user_id,
        "fullName": full_name,
        "email": email,
        "role": role.as_str(),
    }))
}

fn owns_records(conn: &Connection, user_id: &str) -> Result<bool, HandlerErr> {
    let local = conn
        .query_row(
            "SELECT 1 FROM local_records WHERE sk_user_id = ? LIMIT 1",
            [user_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if local {
        return Ok(true);
    }
    conn.query_row(
        "SELECT 1 FROM non_local_records WHERE sk_user_id = ? LIMIT 1",
        [user_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn delete_inner(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let user_id = get_required_str(&req.params, "userId")?;

    // Reporting records are never hard-deleted, so a user that owns any
    // cannot be removed without orphaning them.
    if owns_records(conn, &user_id)? {
        return Err(HandlerErr::new(
            "conflict",
            "user owns reporting records and cannot be deleted",
        ));
    }

    conn.execute("DELETE FROM assignments WHERE sk_user_id = ?", [&user_id])
        .map_err(HandlerErr::db_insert)?;
    conn.execute("DELETE FROM user_roles WHERE user_id = ?", [&user_id])
        .map_err(HandlerErr::db_insert)?;
    let affected = conn
        .execute("DELETE FROM profiles WHERE user_id = ?", [&user_id])
        .map_err(HandlerErr::db_insert)?;
    if affected == 0 {
        return Err(HandlerErr::new("not_found", "user not found"));
    }

    Ok(json!({ "userId": user_id }))
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
        "users.list" => Some(respond(req, list_inner(state, req))),
        "users.create" => Some(respond(req, create_inner(state, req))),
        "users.delete" => Some(respond(req, delete_inner(state, req))),
        _ => None,
    }
}

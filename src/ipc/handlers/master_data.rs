use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, new_id, now_timestamp, require_actor, require_admin,
    require_db,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn parent_exists(
    conn: &Connection,
    table: &str,
    id: &str,
) -> Result<bool, HandlerErr> {
    let sql = match table {
        "districts" => "SELECT 1 FROM districts WHERE id = ?",
        "upazilas" => "SELECT 1 FROM upazilas WHERE id = ?",
        "unions" => "SELECT 1 FROM unions WHERE id = ?",
        _ => return Err(HandlerErr::new("internal", "unknown parent table")),
    };
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}

fn districts_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_actor(req)?;
    let mut stmt = conn
        .prepare("SELECT id, name FROM districts ORDER BY name")
        .map_err(HandlerErr::db_query)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "rows": rows }))
}

fn districts_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let name = get_required_str(&req.params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name is required"));
    }

    let duplicate = conn
        .query_row("SELECT 1 FROM districts WHERE name = ?", [&name], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if duplicate {
        return Err(HandlerErr::new("conflict", "district already exists"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO districts(id, name, created_at) VALUES(?, ?, ?)",
        (&id, &name, now_timestamp()),
    )
    .map_err(HandlerErr::db_insert)?;
    Ok(json!({ "id": id, "name": name }))
}

fn upazilas_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_actor(req)?;
    let district_id = get_optional_str(&req.params, "districtId");

    let mut sql = "SELECT up.id, up.district_id, d.name, up.name
         FROM upazilas up
         JOIN districts d ON d.id = up.district_id"
        .to_string();
    if district_id.is_some() {
        sql.push_str(" WHERE up.district_id = ?");
    }
    sql.push_str(" ORDER BY d.name, up.name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "districtId": r.get::<_, String>(1)?,
            "district": r.get::<_, String>(2)?,
            "name": r.get::<_, String>(3)?,
        }))
    };
    let rows: Vec<serde_json::Value> = match district_id {
        Some(did) => stmt
            .query_map([did], map_row)
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?,
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?,
    };
    Ok(json!({ "rows": rows }))
}

fn upazilas_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let district_id = get_required_str(&req.params, "districtId")?;
    let name = get_required_str(&req.params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name is required"));
    }
    if !parent_exists(conn, "districts", &district_id)? {
        return Err(HandlerErr::new("not_found", "district not found"));
    }

    let duplicate = conn
        .query_row(
            "SELECT 1 FROM upazilas WHERE district_id = ? AND name = ?",
            (&district_id, &name),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if duplicate {
        return Err(HandlerErr::new("conflict", "upazila already exists"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO upazilas(id, district_id, name, created_at) VALUES(?, ?, ?, ?)",
        (&id, &district_id, &name, now_timestamp()),
    )
    .map_err(HandlerErr::db_insert)?;
    Ok(json!({ "id": id, "districtId": district_id, "name": name }))
}

fn unions_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_actor(req)?;
    let upazila_id = get_optional_str(&req.params, "upazilaId");

    let mut sql = "SELECT un.id, un.upazila_id, up.name, un.name
         FROM unions un
         JOIN upazilas up ON up.id = un.upazila_id"
        .to_string();
    if upazila_id.is_some() {
        sql.push_str(" WHERE un.upazila_id = ?");
    }
    sql.push_str(" ORDER BY up.name, un.name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "upazilaId": r.get::<_, String>(1)?,
            "upazila": r.get::<_, String>(2)?,
            "name": r.get::<_, String>(3)?,
        }))
    };
    let rows: Vec<serde_json::Value> = match upazila_id {
        Some(uid) => stmt
            .query_map([uid], map_row)
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?,
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?,
    };
    Ok(json!({ "rows": rows }))
}

fn unions_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let upazila_id = get_required_str(&req.params, "upazilaId")?;
    let name = get_required_str(&req.params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name is required"));
    }
    if !parent_exists(conn, "upazilas", &upazila_id)? {
        return Err(HandlerErr::new("not_found", "upazila not found"));
    }

    let duplicate = conn
        .query_row(
            "SELECT 1 FROM unions WHERE upazila_id = ? AND name = ?",
            (&upazila_id, &name),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if duplicate {
        return Err(HandlerErr::new("conflict", "union already exists"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO unions(id, upazila_id, name, created_at) VALUES(?, ?, ?, ?)",
        (&id, &upazila_id, &name, now_timestamp()),
    )
    .map_err(HandlerErr::db_insert)?;
    Ok(json!({ "id": id, "upazilaId": upazila_id, "name": name }))
}

fn villages_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_actor(req)?;
    let union_id = get_optional_str(&req.params, "unionId");

    let mut sql = "SELECT v.id, v.union_id, un.name, up.name, d.name, v.name, v.ward_no
         FROM villages v
         JOIN unions un ON un.id = v.union_id
         JOIN upazilas up ON up.id = un.upazila_id
         JOIN districts d ON d.id = up.district_id"
        .to_string();
    if union_id.is_some() {
        sql.push_str(" WHERE v.union_id = ?");
    }
    sql.push_str(" ORDER BY d.name, up.name, un.name, v.name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "unionId": r.get::<_, String>(1)?,
            "union": r.get::<_, String>(2)?,
            "upazila": r.get::<_, String>(3)?,
            "district": r.get::<_, String>(4)?,
            "name": r.get::<_, String>(5)?,
            "ward": r.get::<_, Option<String>>(6)?,
        }))
    };
    let rows: Vec<serde_json::Value> = match union_id {
        Some(uid) => stmt
            .query_map([uid], map_row)
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?,
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?,
    };
    Ok(json!({ "rows": rows }))
}

fn villages_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(req)?;
    let union_id = get_required_str(&req.params, "unionId")?;
    let name = get_required_str(&req.params, "name")?;
    let ward_no = get_optional_str(&req.params, "wardNo");
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name is required"));
    }
    if !parent_exists(conn, "unions", &union_id)? {
        return Err(HandlerErr::new("not_found", "union not found"));
    }

    let duplicate = conn
        .query_row(
            "SELECT 1 FROM villages WHERE union_id = ? AND name = ?",
            (&union_id, &name),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if duplicate {
        return Err(HandlerErr::new("conflict", "village already exists"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO villages(id, union_id, name, ward_no, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, &union_id, &name, &ward_no, now_timestamp()),
    )
    .map_err(HandlerErr::db_insert)?;
    Ok(json!({ "id": id, "unionId": union_id, "name": name, "ward": ward_no }))
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
        "master.districts.list" => Some(respond(req, districts_list(state, req))),
        "master.districts.create" => Some(respond(req, districts_create(state, req))),
        "master.upazilas.list" => Some(respond(req, upazilas_list(state, req))),
        "master.upazilas.create" => Some(respond(req, upazilas_create(state, req))),
        "master.unions.list" => Some(respond(req, unions_list(state, req))),
        "master.unions.create" => Some(respond(req, unions_create(state, req))),
        "master.villages.list" => Some(respond(req, villages_list(state, req))),
        "master.villages.create" => Some(respond(req, villages_create(state, req))),
        _ => None,
    }
}

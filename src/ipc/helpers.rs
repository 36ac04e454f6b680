use crate::calc::{Role, MONTH_COLUMNS};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_actor(req: &Request) -> Result<Actor, HandlerErr> {
    let Some(principal) = req.actor.as_ref() else {
        return Err(HandlerErr::new("bad_params", "missing actor"));
    };
    if principal.user_id.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "missing actor.userId"));
    }
    let Some(role) = Role::parse(&principal.role) else {
        return Err(HandlerErr::with_details(
            "bad_params",
            "actor.role must be admin or sk",
            json!({ "role": principal.role }),
        ));
    };
    Ok(Actor {
        user_id: principal.user_id.clone(),
        role,
    })
}

pub fn require_admin(req: &Request) -> Result<Actor, HandlerErr> {
    let actor = require_actor(req)?;
    if actor.role != Role::Admin {
        return Err(HandlerErr::new("forbidden", "admin role required"));
    }
    Ok(actor)
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_required_year(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing/invalid year"))?;
    check_year_range(year)
}

/// Shared reporting-year bounds. Writes must stay inside the same range the
/// read surfaces accept, or a row becomes unreachable through the API.
pub fn check_year_range(year: i64) -> Result<i64, HandlerErr> {
    if !(2000..=2100).contains(&year) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "year out of range",
            json!({ "year": year }),
        ));
    }
    Ok(year)
}

pub fn get_required_month(params: &serde_json::Value) -> Result<u32, HandlerErr> {
    let month = params
        .get("month")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing/invalid month"))?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "month must be between 1 and 12",
            json!({ "month": month }),
        ));
    }
    Ok(month as u32)
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Dhaka wall-clock timestamp used for created_at/updated_at/approved_at.
pub fn now_timestamp() -> String {
    crate::calc::dhaka_now().to_rfc3339()
}

pub fn is_month_column(key: &str) -> bool {
    MONTH_COLUMNS.contains(&key)
}

/// Comma-joined month column list for SELECTs, e.g. `lr.jan_cases, ...`.
pub fn month_select_list(prefix: &str) -> String {
    MONTH_COLUMNS
        .iter()
        .map(|c| format!("{}{}", prefix, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads the twelve month columns starting at `start` in query order.
pub fn months_from_row(row: &rusqlite::Row<'_>, start: usize) -> rusqlite::Result<[i64; 12]> {
    let mut months = [0_i64; 12];
    for (i, slot) in months.iter_mut().enumerate() {
        *slot = row.get(start + i)?;
    }
    Ok(months)
}

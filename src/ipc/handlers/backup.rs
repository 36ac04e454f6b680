use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_admin};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy(),
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:?}"), None),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_admin(req) {
        return e.response(&req.id);
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    // The open connection holds the database file; release it before the
    // bundle replaces it, then reopen whichever file is in place.
    state.db = None;
    let import_result = backup::import_workspace_bundle(&in_path, &workspace);
    let reopen = db::open_db(&workspace);

    match (import_result, reopen) {
        (Ok(summary), Ok(conn)) => {
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "bundleFormat": summary.bundle_format_detected }),
            )
        }
        (Ok(_), Err(e)) => err(
            &req.id,
            "db_open_failed",
            format!("bundle imported but reopen failed: {e:?}"),
            None,
        ),
        (Err(e), Ok(conn)) => {
            state.db = Some(conn);
            err(&req.id, "io_failed", format!("{e:?}"), None)
        }
        (Err(e), Err(reopen_err)) => err(
            &req.id,
            "io_failed",
            format!("{e:?}; reopen also failed: {reopen_err:?}"),
            None,
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.import" => Some(handle_import(state, req)),
        _ => None,
    }
}

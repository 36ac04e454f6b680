use chrono::{Datelike, FixedOffset, Utc};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const MONTH_COLUMNS: [&str; 12] = [
    "jan_cases",
    "feb_cases",
    "mar_cases",
    "apr_cases",
    "may_cases",
    "jun_cases",
    "jul_cases",
    "aug_cases",
    "sep_cases",
    "oct_cases",
    "nov_cases",
    "dec_cases",
];

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_casebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn casebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    actor: serde_json::Value,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "actor": actor,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    actor: serde_json::Value,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, actor, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn admin_actor() -> serde_json::Value {
    json!({ "userId": "admin-1", "role": "admin" })
}

fn dhaka_now_parts() -> (i64, u32) {
    let offset = FixedOffset::east_opt(6 * 3600).expect("offset");
    let now = Utc::now().with_timezone(&offset);
    (now.year() as i64, now.month())
}

fn seed_reporter(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let district = request_ok(
        stdin,
        reader,
        "d1",
        "master.districts.create",
        admin_actor(),
        json!({ "name": "Rangamati" }),
    );
    let upazila = request_ok(
        stdin,
        reader,
        "u1",
        "master.upazilas.create",
        admin_actor(),
        json!({ "districtId": district["id"], "name": "Barkal" }),
    );
    let union = request_ok(
        stdin,
        reader,
        "un1",
        "master.unions.create",
        admin_actor(),
        json!({ "upazilaId": upazila["id"], "name": "Barkal Union" }),
    );
    let village = request_ok(
        stdin,
        reader,
        "v1",
        "master.villages.create",
        admin_actor(),
        json!({ "unionId": union["id"], "name": "Haribon Para" }),
    );
    let user = request_ok(
        stdin,
        reader,
        "sk1",
        "users.create",
        admin_actor(),
        json!({ "fullName": "SK Worker 2", "email": "sk2@test.com", "role": "sk" }),
    );
    let sk_user_id = user["userId"].as_str().expect("user id").to_string();
    request_ok(
        stdin,
        reader,
        "a1",
        "assignments.create",
        admin_actor(),
        json!({ "skUserId": sk_user_id, "villageId": village["id"] }),
    );
    sk_user_id
}

#[test]
fn approvals_move_cells_from_not_submitted_to_approved() {
    let workspace = temp_dir("casebook-approvals");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        admin_actor(),
        json!({ "path": workspace.to_string_lossy() }),
    );

    let sk_user_id = seed_reporter(&mut stdin, &mut reader);
    let (current_year, _) = dhaka_now_parts();

    let review = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "review.list",
        admin_actor(),
        json!({ "recordType": "local", "year": current_year }),
    );
    let rows = review["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    let record_id = rows[0]["id"].as_str().expect("record id").to_string();
    assert_eq!(rows[0]["skUserId"].as_str(), Some(sk_user_id.as_str()));
    for cell in rows[0]["months"].as_array().expect("months") {
        assert_eq!(cell["status"], json!("NOT_SUBMITTED"));
    }

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "ap1",
        "review.approveMonth",
        admin_actor(),
        json!({
            "recordType": "local",
            "recordId": record_id,
            "year": current_year,
            "month": 2,
        }),
    );
    assert_eq!(approved["status"], json!("APPROVED"));

    // Re-approving the same cell is a plain overwrite, not an error.
    request_ok(
        &mut stdin,
        &mut reader,
        "ap2",
        "review.approveMonth",
        admin_actor(),
        json!({
            "recordType": "local",
            "recordId": record_id,
            "year": current_year,
            "month": 2,
        }),
    );

    let review = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "review.list",
        admin_actor(),
        json!({ "recordType": "local", "year": current_year }),
    );
    let months = review["rows"][0]["months"].as_array().expect("months");
    for cell in months {
        let month = cell["month"].as_u64().expect("month");
        let expected = if month == 2 { "APPROVED" } else { "NOT_SUBMITTED" };
        assert_eq!(cell["status"], json!(expected), "month {}", month);
    }

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "ap3",
        "review.approveAll",
        admin_actor(),
        json!({
            "recordType": "local",
            "recordId": record_id,
            "year": current_year,
        }),
    );
    let months_approved = all["approvedMonths"].as_array().expect("approvedMonths");
    assert_eq!(months_approved.len(), 12);
    assert!(all.get("failedMonth").is_none(), "unexpected failure: {}", all);

    let review = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "review.list",
        admin_actor(),
        json!({ "recordType": "local", "year": current_year }),
    );
    for cell in review["rows"][0]["months"].as_array().expect("months") {
        assert_eq!(cell["status"], json!("APPROVED"));
    }

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn review_is_admin_only_and_checks_record_identity() {
    let workspace = temp_dir("casebook-review-gate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        admin_actor(),
        json!({ "path": workspace.to_string_lossy() }),
    );

    let sk_user_id = seed_reporter(&mut stdin, &mut reader);
    let (current_year, _) = dhaka_now_parts();
    let sk_actor = json!({ "userId": sk_user_id, "role": "sk" });

    let denied = request(
        &mut stdin,
        &mut reader,
        "r1",
        "review.list",
        sk_actor,
        json!({ "recordType": "local", "year": current_year }),
    );
    assert_eq!(denied["ok"], json!(false));
    assert_eq!(denied["error"]["code"], json!("forbidden"));

    let missing = request(
        &mut stdin,
        &mut reader,
        "ap1",
        "review.approveMonth",
        admin_actor(),
        json!({
            "recordType": "local",
            "recordId": "no-such-record",
            "year": current_year,
            "month": 1,
        }),
    );
    assert_eq!(missing["ok"], json!(false));
    assert_eq!(missing["error"]["code"], json!("not_found"));

    let bad_type = request(
        &mut stdin,
        &mut reader,
        "ap2",
        "review.approveMonth",
        admin_actor(),
        json!({
            "recordType": "overseas",
            "recordId": "x",
            "year": current_year,
            "month": 1,
        }),
    );
    assert_eq!(bad_type["ok"], json!(false));
    assert_eq!(bad_type["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

/// The admin ledger view and the reporter grid heuristic deliberately
/// disagree: approving every month does not turn the reporter's current
/// month cell green.
#[test]
fn reporter_grid_heuristic_ignores_the_approval_ledger() {
    let workspace = temp_dir("casebook-divergence");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        admin_actor(),
        json!({ "path": workspace.to_string_lossy() }),
    );

    let sk_user_id = seed_reporter(&mut stdin, &mut reader);
    let (current_year, current_month) = dhaka_now_parts();
    let sk_actor = json!({ "userId": sk_user_id, "role": "sk" });
    let open_column = MONTH_COLUMNS[(current_month - 1) as usize];

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "records.local.list",
        sk_actor.clone(),
        json!({ "year": current_year }),
    );
    let record_id = listed["rows"][0]["id"].as_str().expect("record id").to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "records.local.save",
        sk_actor.clone(),
        json!({ "edits": [{ "id": record_id, open_column: 5 }] }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "ap1",
        "review.approveAll",
        admin_actor(),
        json!({
            "recordType": "local",
            "recordId": record_id,
            "year": current_year,
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "records.local.list",
        sk_actor,
        json!({ "year": current_year }),
    );
    let months = listed["rows"][0]["months"].as_array().expect("months");
    for (idx, cell) in months.iter().enumerate() {
        let expected = if idx as u32 + 1 == current_month {
            // Filled and in the open window: still provisional yellow.
            "YELLOW"
        } else {
            // Empty months stay red no matter what the ledger says.
            "RED"
        };
        assert_eq!(cell["status"], json!(expected), "month index {}", idx);
    }

    drop(stdin);
    let _ = child.wait();
}

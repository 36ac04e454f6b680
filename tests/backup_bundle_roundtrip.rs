use chrono::{Datelike, FixedOffset, Utc};
use serde_json::json;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

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

fn dhaka_year() -> i64 {
    let offset = FixedOffset::east_opt(6 * 3600).expect("offset");
    Utc::now().with_timezone(&offset).year() as i64
}

#[test]
fn export_produces_a_manifest_bundle_and_import_restores_it() {
    let workspace = temp_dir("casebook-backup-src");
    let restore_workspace = temp_dir("casebook-backup-dst");
    let bundle_path = temp_dir("casebook-backup-out").join("bundle.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        admin_actor(),
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Something worth carrying across.
    let sk = request_ok(
        &mut stdin,
        &mut reader,
        "uc",
        "users.create",
        admin_actor(),
        json!({ "fullName": "SK Worker E", "email": "ske@test.com", "role": "sk" }),
    );
    let sk_user_id = sk["userId"].as_str().expect("user id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "records.nonLocal.save",
        json!({ "userId": sk_user_id, "role": "sk" }),
        json!({ "inserts": [{
            "reportingYear": dhaka_year(),
            "country": "Myanmar",
            "villageName": "Kyein Chaung",
            "jun_cases": 9,
        }]}),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "bx",
        "backup.export",
        admin_actor(),
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], json!("casebook-workspace-v1"));
    assert_eq!(exported["entryCount"], json!(3));
    let db_sha = exported["dbSha256"].as_str().expect("dbSha256");
    assert_eq!(db_sha.len(), 64);

    // Inspect the bundle on disk.
    let file = std::fs::File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(file).expect("read bundle");
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).expect("entry").name().to_string())
        .collect();
    assert!(names.contains(&"manifest.json".to_string()), "{:?}", names);
    assert!(
        names.contains(&"db/casebook.sqlite3".to_string()),
        "{:?}",
        names
    );
    let mut manifest_text = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest_text)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text).expect("manifest json");
    assert_eq!(manifest["format"], json!("casebook-workspace-v1"));
    assert_eq!(manifest["dbSha256"], json!(db_sha));

    // Restore into a fresh workspace.
    request_ok(
        &mut stdin,
        &mut reader,
        "ws2",
        "workspace.select",
        admin_actor(),
        json!({ "path": restore_workspace.to_string_lossy() }),
    );
    let before = request_ok(
        &mut stdin,
        &mut reader,
        "l0",
        "records.nonLocal.list",
        admin_actor(),
        json!({ "year": dhaka_year() }),
    );
    assert_eq!(before["rows"].as_array().expect("rows").len(), 0);

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "bi",
        "backup.import",
        admin_actor(),
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(imported["bundleFormat"], json!("casebook-workspace-v1"));

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "records.nonLocal.list",
        admin_actor(),
        json!({ "year": dhaka_year() }),
    );
    let rows = after["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["country"], json!("Myanmar"));
    assert_eq!(rows[0]["total"], json!(9));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn import_rejects_files_that_are_not_bundles() {
    let workspace = temp_dir("casebook-backup-badinput");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        admin_actor(),
        json!({ "path": workspace.to_string_lossy() }),
    );

    let not_a_bundle = workspace.join("notes.txt");
    std::fs::write(&not_a_bundle, "just some text").expect("write file");

    let denied = request(
        &mut stdin,
        &mut reader,
        "bi",
        "backup.import",
        admin_actor(),
        json!({ "inPath": not_a_bundle.to_string_lossy() }),
    );
    assert_eq!(denied["ok"], json!(false));
    assert_eq!(denied["error"]["code"], json!("io_failed"));

    // The daemon recovers its database connection and keeps serving.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "records.local.list",
        admin_actor(),
        json!({ "year": dhaka_year() }),
    );
    assert_eq!(listed["rows"].as_array().expect("rows").len(), 0);

    drop(stdin);
    let _ = child.wait();
}

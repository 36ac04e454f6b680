use rusqlite::Connection;
use std::path::Path;

const MONTH_CASE_COLUMNS_SQL: &str = "jan_cases INTEGER NOT NULL DEFAULT 0,
            feb_cases INTEGER NOT NULL DEFAULT 0,
            mar_cases INTEGER NOT NULL DEFAULT 0,
            apr_cases INTEGER NOT NULL DEFAULT 0,
            may_cases INTEGER NOT NULL DEFAULT 0,
            jun_cases INTEGER NOT NULL DEFAULT 0,
            jul_cases INTEGER NOT NULL DEFAULT 0,
            aug_cases INTEGER NOT NULL DEFAULT 0,
            sep_cases INTEGER NOT NULL DEFAULT 0,
            oct_cases INTEGER NOT NULL DEFAULT 0,
            nov_cases INTEGER NOT NULL DEFAULT 0,
            dec_cases INTEGER NOT NULL DEFAULT 0";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("casebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            user_id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_roles(
            user_id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES profiles(user_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS districts(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS upazilas(
            id TEXT PRIMARY KEY,
            district_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(district_id) REFERENCES districts(id),
            UNIQUE(district_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_upazilas_district ON upazilas(district_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS unions(
            id TEXT PRIMARY KEY,
            upazila_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(upazila_id) REFERENCES upazilas(id),
            UNIQUE(upazila_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_unions_upazila ON unions(upazila_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS villages(
            id TEXT PRIMARY KEY,
            union_id TEXT NOT NULL,
            name TEXT NOT NULL,
            ward_no TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(union_id) REFERENCES unions(id),
            UNIQUE(union_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_villages_union ON villages(union_id)",
        [],
    )?;

    // Early workspaces were created before wards were tracked.
    ensure_villages_ward_no(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            sk_user_id TEXT NOT NULL,
            village_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(sk_user_id) REFERENCES profiles(user_id),
            FOREIGN KEY(village_id) REFERENCES villages(id),
            UNIQUE(sk_user_id, village_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_sk ON assignments(sk_user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_village ON assignments(village_id)",
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS local_records(
            id TEXT PRIMARY KEY,
            sk_user_id TEXT NOT NULL,
            village_id TEXT NOT NULL,
            reporting_year INTEGER NOT NULL,
            hh INTEGER NOT NULL DEFAULT 0,
            population INTEGER NOT NULL DEFAULT 0,
            itn_2023 INTEGER NOT NULL DEFAULT 0,
            itn_2024 INTEGER NOT NULL DEFAULT 0,
            itn_2025 INTEGER NOT NULL DEFAULT 0,
            {},
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(sk_user_id) REFERENCES profiles(user_id),
            FOREIGN KEY(village_id) REFERENCES villages(id),
            UNIQUE(sk_user_id, village_id, reporting_year)
        )",
            MONTH_CASE_COLUMNS_SQL
        ),
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_local_records_year ON local_records(reporting_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_local_records_sk ON local_records(sk_user_id)",
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS non_local_records(
            id TEXT PRIMARY KEY,
            sk_user_id TEXT NOT NULL,
            reporting_year INTEGER NOT NULL,
            country TEXT NOT NULL DEFAULT 'Bangladesh',
            district_or_state TEXT NOT NULL DEFAULT '',
            upazila_or_township TEXT NOT NULL DEFAULT '',
            union_name TEXT NOT NULL DEFAULT '',
            village_name TEXT NOT NULL DEFAULT '',
            {},
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(sk_user_id) REFERENCES profiles(user_id)
        )",
            MONTH_CASE_COLUMNS_SQL
        ),
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_non_local_records_year
         ON non_local_records(reporting_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_non_local_records_sk
         ON non_local_records(sk_user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monthly_approvals(
            record_type TEXT NOT NULL,
            record_id TEXT NOT NULL,
            reporting_year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            status TEXT NOT NULL,
            approved_by TEXT,
            approved_at TEXT,
            PRIMARY KEY(record_type, record_id, reporting_year, month)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monthly_approvals_type_year
         ON monthly_approvals(record_type, reporting_year)",
        [],
    )?;

    Ok(conn)
}

fn ensure_villages_ward_no(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "villages", "ward_no")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE villages ADD COLUMN ward_no TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

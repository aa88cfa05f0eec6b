use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("institute.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            role TEXT NOT NULL,
            sub_role TEXT,
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Workspaces created before employee sub-roles existed lack the column.
    ensure_users_sub_role(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS employees(
            user_id TEXT PRIMARY KEY,
            designation TEXT,
            phone TEXT,
            joined_on TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            course TEXT NOT NULL,
            tutor_id TEXT,
            start_date TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(tutor_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batches_tutor ON batches(tutor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            user_id TEXT PRIMARY KEY,
            batch_id TEXT,
            guardian_name TEXT,
            phone TEXT,
            joined_on TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch ON students(batch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            date TEXT NOT NULL,
            present INTEGER,
            holiday INTEGER NOT NULL DEFAULT 0,
            marked_by TEXT,
            marked_at TEXT,
            UNIQUE(user_id, date),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    ensure_attendance_holiday(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_user ON attendance(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_user_date ON attendance(user_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leaves(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            from_date TEXT NOT NULL,
            to_date TEXT NOT NULL,
            leave_type TEXT NOT NULL,
            reason TEXT,
            status TEXT NOT NULL DEFAULT 'PENDING',
            applied_at TEXT NOT NULL,
            decided_by TEXT,
            decided_at TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leaves_user ON leaves(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leaves_status ON leaves(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leave_allotments(
            user_id TEXT NOT NULL,
            leave_type TEXT NOT NULL,
            total_days REAL NOT NULL,
            PRIMARY KEY(user_id, leave_type),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL,
            recipient_id TEXT,
            recipient_role TEXT,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            FOREIGN KEY(sender_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            details TEXT,
            assigned_to TEXT NOT NULL,
            assigned_by TEXT NOT NULL,
            due_date TEXT,
            status TEXT NOT NULL DEFAULT 'OPEN',
            created_at TEXT NOT NULL,
            FOREIGN KEY(assigned_to) REFERENCES users(id),
            FOREIGN KEY(assigned_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_assigned_to ON tasks(assigned_to)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS seen_marks(
            user_id TEXT NOT NULL,
            category TEXT NOT NULL,
            seen_at TEXT NOT NULL,
            PRIMARY KEY(user_id, category),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    seed_admin_if_empty(&conn)?;

    Ok(conn)
}

/// Salted SHA-256, hex-encoded. Not a KDF; the daemon is a local sidecar and
/// the workspace file is the trust boundary.
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// A brand-new workspace has no way to log in; seed a default admin that the
/// institute is expected to re-credential on first use.
fn seed_admin_if_empty(conn: &Connection) -> anyhow::Result<()> {
    let user_count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if user_count > 0 {
        return Ok(());
    }
    let salt = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, email, password_hash, salt, role, sub_role, display_name, active, created_at)
         VALUES(?, ?, ?, ?, 'ADMIN', NULL, 'Administrator', 1, ?)",
        (
            Uuid::new_v4().to_string(),
            "admin@institute.local",
            hash_password(&salt, "admin"),
            &salt,
            now_iso(),
        ),
    )?;
    Ok(())
}

fn ensure_users_sub_role(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "sub_role")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE users ADD COLUMN sub_role TEXT", [])?;
    Ok(())
}

fn ensure_attendance_holiday(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance", "holiday")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance ADD COLUMN holiday INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
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

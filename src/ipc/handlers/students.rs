use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let batch_id = gate::optional_str(req, "batchId");

    let sql = "SELECT u.id, u.email, u.display_name, u.active,
                      s.batch_id, s.guardian_name, s.phone, s.joined_on
               FROM users u
               JOIN students s ON s.user_id = u.id
               WHERE u.role = 'STUDENT'
                 AND (?1 IS NULL OR s.batch_id = ?1)
               ORDER BY u.display_name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&batch_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "email": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "active": row.get::<_, i64>(3)? != 0,
                "batchId": row.get::<_, Option<String>>(4)?,
                "guardianName": row.get::<_, Option<String>>(5)?,
                "phone": row.get::<_, Option<String>>(6)?,
                "joinedOn": row.get::<_, Option<String>>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = match gate::required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match gate::required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let display_name = match gate::required_str(req, "displayName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let batch_id = gate::optional_str(req, "batchId");
    let guardian_name = gate::optional_str(req, "guardianName");
    let phone = gate::optional_str(req, "phone");
    let joined_on = gate::optional_str(req, "joinedOn");

    if let Some(bid) = batch_id.as_deref() {
        let batch_exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM batches WHERE id = ?", [bid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if batch_exists.is_none() {
            return err(&req.id, "not_found", "batch not found", None);
        }
    }

    let taken: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(&req.id, "conflict", "email already in use", None);
    }

    let user_id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().to_string();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO users(id, email, password_hash, salt, role, sub_role, display_name, active, created_at)
         VALUES(?, ?, ?, ?, 'STUDENT', NULL, ?, 1, ?)",
        (
            &user_id,
            &email,
            db::hash_password(&salt, &password),
            &salt,
            &display_name,
            db::now_iso(),
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }
    if let Err(e) = tx.execute(
        "INSERT INTO students(user_id, batch_id, guardian_name, phone, joined_on)
         VALUES(?, ?, ?, ?, ?)",
        (&user_id, &batch_id, &guardian_name, &phone, &joined_on),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": user_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match gate::required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'STUDENT'",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Some(v) = patch.get("displayName").and_then(|v| v.as_str()) {
        let v = v.trim();
        if v.is_empty() {
            let _ = tx.rollback();
            return err(&req.id, "bad_params", "displayName must not be empty", None);
        }
        if let Err(e) = tx.execute(
            "UPDATE users SET display_name = ? WHERE id = ?",
            (v, &student_id),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        if let Err(e) = tx.execute(
            "UPDATE users SET active = ? WHERE id = ?",
            (v as i64, &student_id),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("password").and_then(|v| v.as_str()) {
        if v.is_empty() {
            let _ = tx.rollback();
            return err(&req.id, "bad_params", "password must not be empty", None);
        }
        let salt = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "UPDATE users SET password_hash = ?, salt = ? WHERE id = ?",
            (db::hash_password(&salt, v), &salt, &student_id),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("batchId") {
        let batch_id = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if let Some(bid) = batch_id.as_deref() {
            let batch_exists: Option<i64> = match tx
                .query_row("SELECT 1 FROM batches WHERE id = ?", [bid], |r| r.get(0))
                .optional()
            {
                Ok(v) => v,
                Err(e) => {
                    let _ = tx.rollback();
                    return err(&req.id, "db_query_failed", e.to_string(), None);
                }
            };
            if batch_exists.is_none() {
                let _ = tx.rollback();
                return err(&req.id, "not_found", "batch not found", None);
            }
        }
        if let Err(e) = tx.execute(
            "UPDATE students SET batch_id = ? WHERE user_id = ?",
            (&batch_id, &student_id),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    for (key, column) in [
        ("guardianName", "guardian_name"),
        ("phone", "phone"),
        ("joinedOn", "joined_on"),
    ] {
        if let Some(v) = patch.get(key) {
            let value = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            let sql = format!("UPDATE students SET {} = ? WHERE user_id = ?", column);
            if let Err(e) = tx.execute(&sql, (&value, &student_id)) {
                let _ = tx.rollback();
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match gate::required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'STUDENT'",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    for (table, sql) in [
        ("feedback", "SELECT COUNT(*) FROM feedback WHERE student_id = ?"),
        ("tasks", "SELECT COUNT(*) FROM tasks WHERE assigned_to = ?"),
    ] {
        let count: i64 = match conn.query_row(sql, [&student_id], |r| r.get(0)) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if count > 0 {
            return err(
                &req.id,
                "conflict",
                "student still has linked records",
                Some(json!({ "table": table, "count": count })),
            );
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for sql in [
        "DELETE FROM seen_marks WHERE user_id = ?",
        "DELETE FROM students WHERE user_id = ?",
        "DELETE FROM users WHERE id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}

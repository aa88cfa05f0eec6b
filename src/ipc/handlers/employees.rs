use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_employees_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.email, u.display_name, u.sub_role, u.active,
                e.designation, e.phone, e.joined_on
         FROM users u
         JOIN employees e ON e.user_id = u.id
         WHERE u.role = 'EMPLOYEE'
         ORDER BY u.display_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "email": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "subRole": row.get::<_, Option<String>>(3)?,
                "active": row.get::<_, i64>(4)? != 0,
                "designation": row.get::<_, Option<String>>(5)?,
                "phone": row.get::<_, Option<String>>(6)?,
                "joinedOn": row.get::<_, Option<String>>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(employees) => ok(&req.id, json!({ "employees": employees })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_employees_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let sub_role = gate::optional_str(req, "subRole");
    if let Some(sr) = sub_role.as_deref() {
        if sr != "TUTOR" {
            return err(&req.id, "bad_params", "subRole must be TUTOR", None);
        }
    }
    let designation = gate::optional_str(req, "designation");
    let phone = gate::optional_str(req, "phone");
    let joined_on = gate::optional_str(req, "joinedOn");

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
         VALUES(?, ?, ?, ?, 'EMPLOYEE', ?, ?, 1, ?)",
        (
            &user_id,
            &email,
            db::hash_password(&salt, &password),
            &salt,
            &sub_role,
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
        "INSERT INTO employees(user_id, designation, phone, joined_on) VALUES(?, ?, ?, ?)",
        (&user_id, &designation, &phone, &joined_on),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "employees" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "employeeId": user_id }))
}

fn handle_employees_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let employee_id = match gate::required_str(req, "employeeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'EMPLOYEE'",
            [&employee_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "employee not found", None);
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
            (v, &employee_id),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("subRole") {
        let sub_role = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if let Some(sr) = sub_role.as_deref() {
            if sr != "TUTOR" {
                let _ = tx.rollback();
                return err(&req.id, "bad_params", "subRole must be TUTOR", None);
            }
        }
        if let Err(e) = tx.execute(
            "UPDATE users SET sub_role = ? WHERE id = ?",
            (&sub_role, &employee_id),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        if let Err(e) = tx.execute(
            "UPDATE users SET active = ? WHERE id = ?",
            (v as i64, &employee_id),
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
            (db::hash_password(&salt, v), &salt, &employee_id),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    for (key, column) in [
        ("designation", "designation"),
        ("phone", "phone"),
        ("joinedOn", "joined_on"),
    ] {
        if let Some(v) = patch.get(key) {
            let value = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            let sql = format!("UPDATE employees SET {} = ? WHERE user_id = ?", column);
            if let Err(e) = tx.execute(&sql, (&value, &employee_id)) {
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

fn handle_employees_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let employee_id = match gate::required_str(req, "employeeId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'EMPLOYEE'",
            [&employee_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "employee not found", None);
    }

    // History must outlive roster edits: refuse while records reference the
    // employee instead of cascading.
    for (table, sql) in [
        ("attendance", "SELECT COUNT(*) FROM attendance WHERE user_id = ?"),
        ("leaves", "SELECT COUNT(*) FROM leaves WHERE user_id = ?"),
        ("batches", "SELECT COUNT(*) FROM batches WHERE tutor_id = ?"),
    ] {
        let count: i64 = match conn.query_row(sql, [&employee_id], |r| r.get(0)) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if count > 0 {
            return err(
                &req.id,
                "conflict",
                "employee still has linked records",
                Some(json!({ "table": table, "count": count })),
            );
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for sql in [
        "DELETE FROM leave_allotments WHERE user_id = ?",
        "DELETE FROM seen_marks WHERE user_id = ?",
        "DELETE FROM employees WHERE user_id = ?",
        "DELETE FROM users WHERE id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&employee_id]) {
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
        "employees.list" => Some(handle_employees_list(state, req)),
        "employees.create" => Some(handle_employees_create(state, req)),
        "employees.update" => Some(handle_employees_update(state, req)),
        "employees.delete" => Some(handle_employees_delete(state, req)),
        _ => None,
    }
}

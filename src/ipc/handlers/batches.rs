use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_batches_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin, Role::Employee]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    // Enrollment count inline so the roster page needs one call.
    let mut stmt = match conn.prepare(
        "SELECT b.id, b.name, b.course, b.tutor_id, b.start_date, b.active,
                (SELECT COUNT(*) FROM students s WHERE s.batch_id = b.id) AS student_count
         FROM batches b
         ORDER BY b.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "course": row.get::<_, String>(2)?,
                "tutorId": row.get::<_, Option<String>>(3)?,
                "startDate": row.get::<_, Option<String>>(4)?,
                "active": row.get::<_, i64>(5)? != 0,
                "studentCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(batches) => ok(&req.id, json!({ "batches": batches })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_batches_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match gate::required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course = match gate::required_str(req, "course") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tutor_id = gate::optional_str(req, "tutorId");
    let start_date = gate::optional_str(req, "startDate");

    if let Some(tid) = tutor_id.as_deref() {
        let is_employee: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM users WHERE id = ? AND role = 'EMPLOYEE'",
                [tid],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if is_employee.is_none() {
            return err(&req.id, "not_found", "tutor not found", None);
        }
    }

    let batch_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO batches(id, name, course, tutor_id, start_date, active)
         VALUES(?, ?, ?, ?, ?, 1)",
        (&batch_id, &name, &course, &tutor_id, &start_date),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "batches" })),
        );
    }
    ok(&req.id, json!({ "batchId": batch_id }))
}

fn handle_batches_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let batch_id = match gate::required_str(req, "batchId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM batches WHERE id = ?", [&batch_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "batch not found", None);
    }

    for (key, column) in [("name", "name"), ("course", "course")] {
        if let Some(v) = patch.get(key).and_then(|v| v.as_str()) {
            let v = v.trim();
            if v.is_empty() {
                return err(
                    &req.id,
                    "bad_params",
                    format!("{} must not be empty", key),
                    None,
                );
            }
            let sql = format!("UPDATE batches SET {} = ? WHERE id = ?", column);
            if let Err(e) = conn.execute(&sql, (v, &batch_id)) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }
    if let Some(v) = patch.get("tutorId") {
        let tutor_id = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if let Some(tid) = tutor_id.as_deref() {
            let is_employee: Option<i64> = match conn
                .query_row(
                    "SELECT 1 FROM users WHERE id = ? AND role = 'EMPLOYEE'",
                    [tid],
                    |r| r.get(0),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if is_employee.is_none() {
                return err(&req.id, "not_found", "tutor not found", None);
            }
        }
        if let Err(e) = conn.execute(
            "UPDATE batches SET tutor_id = ? WHERE id = ?",
            (&tutor_id, &batch_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("startDate") {
        let start = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if let Err(e) = conn.execute(
            "UPDATE batches SET start_date = ? WHERE id = ?",
            (&start, &batch_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE batches SET active = ? WHERE id = ?",
            (v as i64, &batch_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_batches_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let batch_id = match gate::required_str(req, "batchId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM batches WHERE id = ?", [&batch_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "batch not found", None);
    }

    let enrolled: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE batch_id = ?",
        [&batch_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if enrolled > 0 {
        return err(
            &req.id,
            "conflict",
            "batch still has enrolled students",
            Some(json!({ "count": enrolled })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM batches WHERE id = ?", [&batch_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batches.list" => Some(handle_batches_list(state, req)),
        "batches.create" => Some(handle_batches_create(state, req)),
        "batches.update" => Some(handle_batches_update(state, req)),
        "batches.delete" => Some(handle_batches_delete(state, req)),
        _ => None,
    }
}

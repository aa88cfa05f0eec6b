use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_tasks_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_admin_or_tutor(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assigned_to = match gate::required_str(req, "assignedTo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match gate::required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let details = gate::optional_str(req, "details");
    let due_date = match gate::optional_str(req, "dueDate") {
        Some(d) => {
            if !crate::resolver::is_iso_date(&d) {
                return err(&req.id, "bad_params", "dueDate must be YYYY-MM-DD", None);
            }
            Some(d)
        }
        None => None,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&assigned_to], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "assignee not found", None);
    }

    let task_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO tasks(id, title, details, assigned_to, assigned_by, due_date, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 'OPEN', ?)",
        (
            &task_id,
            &title,
            &details,
            &assigned_to,
            &session.user_id,
            &due_date,
            db::now_iso(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "tasks" })),
        );
    }
    ok(&req.id, json!({ "taskId": task_id }))
}

fn handle_tasks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    // Non-admins only ever see their own assignments.
    let assigned_to = match (&session.role, gate::optional_str(req, "assignedTo")) {
        (Role::Admin, Some(id)) => Some(id),
        (Role::Admin, None) => None,
        (_, Some(id)) if id != session.user_id => {
            return err(
                &req.id,
                "forbidden",
                "only admins may list another user's tasks",
                None,
            );
        }
        (_, _) => Some(session.user_id.clone()),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, details, assigned_to, assigned_by, due_date, status, created_at
         FROM tasks
         WHERE (?1 IS NULL OR assigned_to = ?1)
         ORDER BY created_at DESC, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&assigned_to], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "details": row.get::<_, Option<String>>(2)?,
                "assignedTo": row.get::<_, String>(3)?,
                "assignedBy": row.get::<_, String>(4)?,
                "dueDate": row.get::<_, Option<String>>(5)?,
                "status": row.get::<_, String>(6)?,
                "createdAt": row.get::<_, String>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(tasks) => ok(&req.id, json!({ "tasks": tasks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_tasks_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let task_id = match gate::required_str(req, "taskId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match gate::required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if status != "OPEN" && status != "DONE" {
        return err(&req.id, "bad_params", "status must be OPEN or DONE", None);
    }

    let assigned_to: Option<String> = match conn
        .query_row(
            "SELECT assigned_to FROM tasks WHERE id = ?",
            [&task_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(assigned_to) = assigned_to else {
        return err(&req.id, "not_found", "task not found", None);
    };
    if session.role != Role::Admin && assigned_to != session.user_id {
        return err(
            &req.id,
            "forbidden",
            "only the assignee or an admin may update a task",
            None,
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE tasks SET status = ? WHERE id = ?",
        (&status, &task_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tasks.create" => Some(handle_tasks_create(state, req)),
        "tasks.list" => Some(handle_tasks_list(state, req)),
        "tasks.setStatus" => Some(handle_tasks_set_status(state, req)),
        _ => None,
    }
}

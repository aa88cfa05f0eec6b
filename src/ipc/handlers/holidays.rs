use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_holidays_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Any logged-in role can read the holiday list; only admin mutates.
    if let Err(e) = gate::require_session(state, req) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let active_only = match gate::parse_bool(req, "activeOnly", false) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sql = if active_only {
        "SELECT id, date, name, active FROM holidays WHERE active = 1 ORDER BY date"
    } else {
        "SELECT id, date, name, active FROM holidays ORDER BY date"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "date": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "active": row.get::<_, i64>(3)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(holidays) => ok(&req.id, json!({ "holidays": holidays })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_holidays_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let date = match gate::required_iso_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match gate::required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let active = match gate::parse_bool(req, "active", true) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let taken: Option<i64> = match conn
        .query_row("SELECT 1 FROM holidays WHERE date = ?", [&date], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(&req.id, "conflict", "a holiday already exists on that date", None);
    }

    let holiday_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO holidays(id, date, name, active) VALUES(?, ?, ?, ?)",
        (&holiday_id, &date, &name, active as i64),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "holidays" })),
        );
    }
    ok(&req.id, json!({ "holidayId": holiday_id }))
}

fn handle_holidays_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let holiday_id = match gate::required_str(req, "holidayId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM holidays WHERE id = ?", [&holiday_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "holiday not found", None);
    }

    if let Some(v) = patch.get("name").and_then(|v| v.as_str()) {
        let v = v.trim();
        if v.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE holidays SET name = ? WHERE id = ?",
            (v, &holiday_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE holidays SET active = ? WHERE id = ?",
            (v as i64, &holiday_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_holidays_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let holiday_id = match gate::required_str(req, "holidayId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let deleted = match conn.execute("DELETE FROM holidays WHERE id = ?", [&holiday_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "holiday not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "holidays.list" => Some(handle_holidays_list(state, req)),
        "holidays.create" => Some(handle_holidays_create(state, req)),
        "holidays.update" => Some(handle_holidays_update(state, req)),
        "holidays.delete" => Some(handle_holidays_delete(state, req)),
        _ => None,
    }
}

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let target = match gate::target_employee(conn, &session, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let date = match gate::required_iso_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(present) = req.params.get("present").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing present", None);
    };
    let holiday = match gate::parse_bool(req, "holiday", false) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // One record per employee per date; re-marking overwrites.
    if let Err(e) = conn.execute(
        "INSERT INTO attendance(id, user_id, date, present, holiday, marked_by, marked_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id, date) DO UPDATE SET
           present = excluded.present,
           holiday = excluded.holiday,
           marked_by = excluded.marked_by,
           marked_at = excluded.marked_at",
        (
            Uuid::new_v4().to_string(),
            &target,
            &date,
            present as i64,
            holiday as i64,
            &session.user_id,
            db::now_iso(),
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "attendance" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let target = match gate::target_employee(conn, &session, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let (year, month) = match gate::parse_month_key(req, "month") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let prefix = format!("{:04}-{:02}-", year, month);

    let mut stmt = match conn.prepare(
        "SELECT date, present, holiday, marked_by, marked_at
         FROM attendance
         WHERE user_id = ? AND date LIKE ? || '%'
         ORDER BY date",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&target, &prefix), |row| {
            Ok(json!({
                "date": row.get::<_, String>(0)?,
                "present": row.get::<_, Option<i64>>(1)?.map(|v| v != 0),
                "holiday": row.get::<_, i64>(2)? != 0,
                "markedBy": row.get::<_, Option<String>>(3)?,
                "markedAt": row.get::<_, Option<String>>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(records) => ok(
            &req.id,
            json!({ "employeeId": target, "records": records }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        _ => None,
    }
}

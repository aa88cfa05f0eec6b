use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use serde_json::json;
use uuid::Uuid;

fn handle_feedback_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_role(state, req, &[Role::Student]) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject = match gate::required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let body = match gate::required_str(req, "body") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let feedback_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO feedback(id, student_id, subject, body, submitted_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &feedback_id,
            &session.user_id,
            &subject,
            &body,
            db::now_iso(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "feedback" })),
        );
    }
    ok(&req.id, json!({ "feedbackId": feedback_id }))
}

fn handle_feedback_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT f.id, f.student_id, u.display_name, f.subject, f.body, f.submitted_at
         FROM feedback f
         JOIN users u ON u.id = f.student_id
         ORDER BY f.submitted_at DESC, f.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "studentName": row.get::<_, String>(2)?,
                "subject": row.get::<_, String>(3)?,
                "body": row.get::<_, String>(4)?,
                "submittedAt": row.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(feedback) => ok(&req.id, json!({ "feedback": feedback })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "feedback.submit" => Some(handle_feedback_submit(state, req)),
        "feedback.list" => Some(handle_feedback_list(state, req)),
        _ => None,
    }
}

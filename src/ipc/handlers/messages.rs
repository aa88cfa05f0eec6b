use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_messages_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
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
    let recipient_id = gate::optional_str(req, "recipientId");
    let recipient_role = gate::optional_str(req, "recipientRole");

    // Exactly one addressing mode: a user or a role broadcast.
    match (&recipient_id, &recipient_role) {
        (Some(_), Some(_)) | (None, None) => {
            return err(
                &req.id,
                "bad_params",
                "provide exactly one of recipientId or recipientRole",
                None,
            );
        }
        _ => {}
    }
    if let Some(rid) = recipient_id.as_deref() {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM users WHERE id = ?", [rid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "recipient not found", None);
        }
    }
    if let Some(role) = recipient_role.as_deref() {
        if Role::parse(role).is_none() {
            return err(
                &req.id,
                "bad_params",
                "recipientRole must be ADMIN, EMPLOYEE or STUDENT",
                None,
            );
        }
    }

    let message_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO messages(id, sender_id, recipient_id, recipient_role, subject, body, sent_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &message_id,
            &session.user_id,
            &recipient_id,
            &recipient_role,
            &subject,
            &body,
            db::now_iso(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "messages" })),
        );
    }
    ok(&req.id, json!({ "messageId": message_id }))
}

fn handle_messages_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    // Inbox: direct messages plus broadcasts to the caller's role.
    let mut stmt = match conn.prepare(
        "SELECT m.id, m.sender_id, u.display_name, m.recipient_role, m.subject, m.body, m.sent_at
         FROM messages m
         JOIN users u ON u.id = m.sender_id
         WHERE m.recipient_id = ?1 OR m.recipient_role = ?2
         ORDER BY m.sent_at DESC, m.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&session.user_id, session.role.as_str()), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "senderId": row.get::<_, String>(1)?,
                "senderName": row.get::<_, String>(2)?,
                "broadcast": row.get::<_, Option<String>>(3)?.is_some(),
                "subject": row.get::<_, String>(4)?,
                "body": row.get::<_, String>(5)?,
                "sentAt": row.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(messages) => ok(&req.id, json!({ "messages": messages })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.send" => Some(handle_messages_send(state, req)),
        "messages.list" => Some(handle_messages_list(state, req)),
        _ => None,
    }
}

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const CATEGORIES: [&str; 4] = ["messages", "leaves", "tasks", "feedback"];

fn seen_at(conn: &Connection, user_id: &str, category: &str) -> Result<String, String> {
    let mark: Option<String> = conn
        .query_row(
            "SELECT seen_at FROM seen_marks WHERE user_id = ? AND category = ?",
            (user_id, category),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| e.to_string())?;
    // Empty string sorts before every timestamp: never-seen counts all.
    Ok(mark.unwrap_or_default())
}

fn open_tasks_since(conn: &Connection, user_id: &str, seen: &str) -> Result<i64, String> {
    conn.query_row(
        "SELECT COUNT(*) FROM tasks
         WHERE assigned_to = ?1 AND status = 'OPEN' AND created_at > ?2",
        (user_id, seen),
        |r| r.get(0),
    )
    .map_err(|e| e.to_string())
}

fn counts_for(
    conn: &Connection,
    user_id: &str,
    role: Role,
) -> Result<serde_json::Value, String> {
    let messages_seen = seen_at(conn, user_id, "messages")?;
    let unread_messages: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM messages
             WHERE (recipient_id = ?1 OR recipient_role = ?2) AND sent_at > ?3",
            (user_id, role.as_str(), &messages_seen),
            |r| r.get(0),
        )
        .map_err(|e| e.to_string())?;

    match role {
        Role::Admin => {
            let leaves_seen = seen_at(conn, user_id, "leaves")?;
            let pending_leaves: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM leaves WHERE status = 'PENDING' AND applied_at > ?1",
                    [&leaves_seen],
                    |r| r.get(0),
                )
                .map_err(|e| e.to_string())?;
            let feedback_seen = seen_at(conn, user_id, "feedback")?;
            let new_feedback: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM feedback WHERE submitted_at > ?1",
                    [&feedback_seen],
                    |r| r.get(0),
                )
                .map_err(|e| e.to_string())?;
            Ok(json!({
                "pendingLeaves": pending_leaves,
                "newFeedback": new_feedback,
                "unreadMessages": unread_messages
            }))
        }
        Role::Employee => {
            let leaves_seen = seen_at(conn, user_id, "leaves")?;
            let decided_leaves: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM leaves
                     WHERE user_id = ?1 AND status != 'PENDING' AND decided_at > ?2",
                    (user_id, &leaves_seen),
                    |r| r.get(0),
                )
                .map_err(|e| e.to_string())?;
            let open_tasks = open_tasks_since(conn, user_id, &seen_at(conn, user_id, "tasks")?)?;
            Ok(json!({
                "decidedLeaves": decided_leaves,
                "openTasks": open_tasks,
                "unreadMessages": unread_messages
            }))
        }
        Role::Student => {
            let open_tasks = open_tasks_since(conn, user_id, &seen_at(conn, user_id, "tasks")?)?;
            Ok(json!({
                "openTasks": open_tasks,
                "unreadMessages": unread_messages
            }))
        }
    }
}

fn handle_counts(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match counts_for(conn, &session.user_id, session.role) {
        Ok(counts) => ok(&req.id, json!({ "counts": counts })),
        Err(m) => err(&req.id, "db_query_failed", m, None),
    }
}

fn handle_mark_seen(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let category = match gate::required_str(req, "category") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !CATEGORIES.contains(&category.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("unknown category: {}", category),
            None,
        );
    }

    if let Err(e) = conn.execute(
        "INSERT INTO seen_marks(user_id, category, seen_at)
         VALUES(?, ?, ?)
         ON CONFLICT(user_id, category) DO UPDATE SET
           seen_at = excluded.seen_at",
        (&session.user_id, &category, db::now_iso()),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "seen_marks" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.counts" => Some(handle_counts(state, req)),
        "notifications.markSeen" => Some(handle_mark_seen(state, req)),
        _ => None,
    }
}

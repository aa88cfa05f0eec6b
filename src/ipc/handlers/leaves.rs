use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

fn leave_row_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "employeeId": row.get::<_, String>(1)?,
        "fromDate": row.get::<_, String>(2)?,
        "toDate": row.get::<_, String>(3)?,
        "type": row.get::<_, String>(4)?,
        "reason": row.get::<_, Option<String>>(5)?,
        "status": row.get::<_, String>(6)?,
        "appliedAt": row.get::<_, String>(7)?,
        "decidedBy": row.get::<_, Option<String>>(8)?,
        "decidedAt": row.get::<_, Option<String>>(9)?
    }))
}

fn handle_leaves_apply(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_role(state, req, &[Role::Employee]) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let from_date = match gate::required_iso_date(req, "fromDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to_date = match gate::required_iso_date(req, "toDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if from_date > to_date {
        return err(&req.id, "bad_params", "fromDate must not be after toDate", None);
    }
    let leave_type = match gate::required_str(req, "type") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(e) => return e,
    };
    let reason = gate::optional_str(req, "reason");

    let leave_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO leaves(id, user_id, from_date, to_date, leave_type, reason, status, applied_at)
         VALUES(?, ?, ?, ?, ?, ?, 'PENDING', ?)",
        (
            &leave_id,
            &session.user_id,
            &from_date,
            &to_date,
            &leave_type,
            &reason,
            db::now_iso(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "leaves" })),
        );
    }
    ok(&req.id, json!({ "leaveId": leave_id }))
}

fn handle_leaves_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // Deterministic order; overlapping-leave resolution depends on it.
    let mut stmt = match conn.prepare(
        "SELECT id, user_id, from_date, to_date, leave_type, reason, status,
                applied_at, decided_by, decided_at
         FROM leaves
         WHERE user_id = ?
         ORDER BY applied_at, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&target], |row| leave_row_json(row))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(leaves) => ok(&req.id, json!({ "employeeId": target, "leaves": leaves })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_leaves_pending(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = gate::require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, user_id, from_date, to_date, leave_type, reason, status,
                applied_at, decided_by, decided_at
         FROM leaves
         WHERE status = 'PENDING'
         ORDER BY applied_at, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| leave_row_json(row))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(leaves) => ok(&req.id, json!({ "leaves": leaves })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_leaves_decide(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_role(state, req, &[Role::Admin]) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let leave_id = match gate::required_str(req, "leaveId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match gate::required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if status != "APPROVED" && status != "REJECTED" {
        return err(
            &req.id,
            "bad_params",
            "status must be APPROVED or REJECTED",
            None,
        );
    }

    let current: Option<String> = match conn
        .query_row("SELECT status FROM leaves WHERE id = ?", [&leave_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(current) = current else {
        return err(&req.id, "not_found", "leave not found", None);
    };
    if current != "PENDING" {
        return err(
            &req.id,
            "conflict",
            format!("leave is already {}", current),
            None,
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE leaves SET status = ?, decided_by = ?, decided_at = ? WHERE id = ?",
        (&status, &session.user_id, db::now_iso(), &leave_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "status": status }))
}

fn inclusive_days(from_date: &str, to_date: &str) -> i64 {
    let from = NaiveDate::parse_from_str(from_date, "%Y-%m-%d");
    let to = NaiveDate::parse_from_str(to_date, "%Y-%m-%d");
    match (from, to) {
        (Ok(f), Ok(t)) if t >= f => (t - f).num_days() + 1,
        _ => 0,
    }
}

pub(crate) fn leave_balance(
    conn: &Connection,
    employee_id: &str,
) -> Result<serde_json::Value, String> {
    let mut allotted: BTreeMap<String, f64> = BTreeMap::new();
    let mut stmt = conn
        .prepare("SELECT leave_type, total_days FROM leave_allotments WHERE user_id = ?")
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([employee_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;
    for (kind, days) in rows {
        allotted.insert(kind, days);
    }

    let mut used: BTreeMap<String, f64> = BTreeMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT leave_type, from_date, to_date FROM leaves
             WHERE user_id = ? AND status = 'APPROVED'",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([employee_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;
    for (kind, from, to) in rows {
        *used.entry(kind).or_insert(0.0) += inclusive_days(&from, &to) as f64;
    }

    let mut kinds: Vec<String> = allotted.keys().cloned().collect();
    for k in used.keys() {
        if !allotted.contains_key(k) {
            kinds.push(k.clone());
        }
    }
    let balance: Vec<serde_json::Value> = kinds
        .iter()
        .map(|k| {
            let total = allotted.get(k).copied().unwrap_or(0.0);
            let taken = used.get(k).copied().unwrap_or(0.0);
            json!({
                "type": k,
                "allotted": total,
                "used": taken,
                "remaining": total - taken
            })
        })
        .collect();
    Ok(json!(balance))
}

fn handle_leaves_balance(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match leave_balance(conn, &target) {
        Ok(balance) => ok(
            &req.id,
            json!({ "employeeId": target, "balance": balance }),
        ),
        Err(m) => err(&req.id, "db_query_failed", m, None),
    }
}

fn handle_leaves_set_allotment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_role(state, req, &[Role::Admin]) {
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
    let leave_type = match gate::required_str(req, "type") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(e) => return e,
    };
    let Some(total_days) = req.params.get("totalDays").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing totalDays", None);
    };
    if total_days < 0.0 {
        return err(&req.id, "bad_params", "totalDays must not be negative", None);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO leave_allotments(user_id, leave_type, total_days)
         VALUES(?, ?, ?)
         ON CONFLICT(user_id, leave_type) DO UPDATE SET
           total_days = excluded.total_days",
        (&target, &leave_type, total_days),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "leave_allotments" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "leaves.apply" => Some(handle_leaves_apply(state, req)),
        "leaves.list" => Some(handle_leaves_list(state, req)),
        "leaves.pending" => Some(handle_leaves_pending(state, req)),
        "leaves.decide" => Some(handle_leaves_decide(state, req)),
        "leaves.balance" => Some(handle_leaves_balance(state, req)),
        "leaves.setAllotment" => Some(handle_leaves_set_allotment(state, req)),
        _ => None,
    }
}

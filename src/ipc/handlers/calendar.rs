use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::handlers::leaves;
use crate::ipc::types::{AppState, Request};
use crate::resolver::{self, AttendanceDay, LeaveSpan};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;

/// The three resolver sources for one employee-month, fetched fresh on every
/// call. Holidays are pre-filtered to active; leaves to APPROVED. Any query
/// failure aborts the whole fetch so the resolver never sees partial data.
pub(crate) fn month_sources(
    conn: &Connection,
    employee_id: &str,
    year: i32,
    month: u32,
) -> Result<(HashSet<String>, Vec<AttendanceDay>, Vec<LeaveSpan>), String> {
    let mut stmt = conn
        .prepare("SELECT date FROM holidays WHERE active = 1")
        .map_err(|e| e.to_string())?;
    let holidays: HashSet<String> = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(|e| e.to_string())?;

    let prefix = format!("{:04}-{:02}-", year, month);
    let mut stmt = conn
        .prepare(
            "SELECT date, present, holiday FROM attendance
             WHERE user_id = ? AND date LIKE ? || '%'
             ORDER BY date, rowid",
        )
        .map_err(|e| e.to_string())?;
    let attendance: Vec<AttendanceDay> = stmt
        .query_map((employee_id, &prefix), |r| {
            Ok(AttendanceDay {
                date: r.get::<_, String>(0)?,
                present: r.get::<_, Option<i64>>(1)?.map(|v| v != 0),
                holiday: r.get::<_, i64>(2)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;

    // Leave ranges can span month boundaries, so all approved leaves are
    // fetched; the resolver does the range check per day. Order matters for
    // overlapping ranges.
    let mut stmt = conn
        .prepare(
            "SELECT from_date, to_date, leave_type FROM leaves
             WHERE user_id = ? AND status = 'APPROVED'
             ORDER BY applied_at, id",
        )
        .map_err(|e| e.to_string())?;
    let approved: Vec<LeaveSpan> = stmt
        .query_map([employee_id], |r| {
            Ok(LeaveSpan {
                from_date: r.get::<_, String>(0)?,
                to_date: r.get::<_, String>(1)?,
                leave_type: r.get::<_, String>(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;

    Ok((holidays, attendance, approved))
}

fn handle_month_open(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    // Echoed untouched so a client that pipelines month navigations can
    // discard responses from superseded requests.
    let generation = req
        .params
        .get("generation")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let (holidays, attendance, approved) = match month_sources(conn, &target, year, month) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "db_query_failed", m, None),
    };
    let balance = match leaves::leave_balance(conn, &target) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "db_query_failed", m, None),
    };

    let days: Vec<serde_json::Value> = resolver::month_dates(year, month)
        .into_iter()
        .map(|date| {
            let status = resolver::resolve(&date, &holidays, &attendance, &approved);
            let status_label = status.as_ref().map(|s| s.label());
            let category = resolver::day_category(&date, status);
            json!({
                "date": date,
                "status": status_label,
                "category": category.label()
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "employeeId": target,
            "month": format!("{:04}-{:02}", year, month),
            "generation": generation,
            "days": days,
            "leaveBalance": balance
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calendar.monthOpen" => Some(handle_month_open(state, req)),
        _ => None,
    }
}

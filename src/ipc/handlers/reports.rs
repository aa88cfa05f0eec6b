use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::handlers::calendar;
use crate::ipc::types::{AppState, Request};
use crate::resolver::{self, DayCategory, DayStatus};
use serde_json::json;
use std::collections::BTreeMap;

/// Month summary computed through the same resolver the calendar uses, so
/// the report can never disagree with the calendar view.
fn handle_attendance_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let (holidays, attendance, approved) =
        match calendar::month_sources(conn, &target, year, month) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "db_query_failed", m, None),
        };

    let mut present = 0i64;
    let mut absent = 0i64;
    let mut holiday = 0i64;
    let mut sunday = 0i64;
    let mut blank = 0i64;
    let mut leave_days: BTreeMap<String, i64> = BTreeMap::new();

    for date in resolver::month_dates(year, month) {
        let status = resolver::resolve(&date, &holidays, &attendance, &approved);
        match resolver::day_category(&date, status) {
            DayCategory::Resolved(DayStatus::Present) => present += 1,
            DayCategory::Resolved(DayStatus::Absent) => absent += 1,
            DayCategory::Resolved(DayStatus::Holiday) => holiday += 1,
            DayCategory::Resolved(DayStatus::Leave(kind)) => {
                *leave_days.entry(kind).or_insert(0) += 1;
            }
            DayCategory::Sunday => sunday += 1,
            DayCategory::Blank => blank += 1,
        }
    }

    let leave_json: serde_json::Map<String, serde_json::Value> = leave_days
        .into_iter()
        .map(|(kind, days)| (kind, json!(days)))
        .collect();

    ok(
        &req.id,
        json!({
            "employeeId": target,
            "month": format!("{:04}-{:02}", year, month),
            "present": present,
            "absent": absent,
            "holiday": holiday,
            "leave": leave_json,
            "sunday": sunday,
            "unmarked": blank
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.attendanceSummary" => Some(handle_attendance_summary(state, req)),
        _ => None,
    }
}

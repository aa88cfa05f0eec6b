use rusqlite::{Connection, OptionalExtension};

use super::error::err;
use super::types::{AppState, Request};
use crate::resolver;
use crate::session::{Role, Session};

/// Shared handler plumbing: workspace/db access, session + role gating, and
/// the common param readers. All helpers return a ready error response on
/// failure so handlers can bail with `?`-free match arms.

pub fn db_conn<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn require_session(state: &AppState, req: &Request) -> Result<Session, serde_json::Value> {
    let Some(token) = req.session.as_deref() else {
        return Err(err(&req.id, "unauthorized", "missing session", None));
    };
    match state.sessions.get(token) {
        Some(s) => Ok(s.clone()),
        None => Err(err(
            &req.id,
            "unauthorized",
            "unknown or expired session",
            None,
        )),
    }
}

pub fn require_role(
    state: &AppState,
    req: &Request,
    roles: &[Role],
) -> Result<Session, serde_json::Value> {
    let session = require_session(state, req)?;
    if !roles.contains(&session.role) {
        return Err(err(
            &req.id,
            "forbidden",
            format!("{} may not call {}", session.role.as_str(), req.method),
            None,
        ));
    }
    Ok(session)
}

/// Task assignment is open to admins and to employees carrying the TUTOR
/// sub-role; plain employees are refused.
pub fn require_admin_or_tutor(
    state: &AppState,
    req: &Request,
) -> Result<Session, serde_json::Value> {
    let session = require_session(state, req)?;
    if session.role == Role::Admin || session.is_tutor() {
        return Ok(session);
    }
    Err(err(
        &req.id,
        "forbidden",
        format!("{} may not call {}", session.role.as_str(), req.method),
        None,
    ))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("missing {}", key),
            None,
        )),
    }
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_iso_date(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = required_str(req, key)?;
    if !resolver::is_iso_date(&raw) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            None,
        ));
    }
    Ok(raw)
}

pub fn parse_bool(
    req: &Request,
    key: &str,
    default: bool,
) -> Result<bool, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a boolean", key),
                None,
            )
        }),
    }
}

/// Attendance, leave, calendar and report families all address "an
/// employee": employees act on themselves, admins on anyone. Students never
/// reach these families.
pub fn target_employee(
    conn: &Connection,
    session: &Session,
    req: &Request,
) -> Result<String, serde_json::Value> {
    if session.role == Role::Student {
        return Err(err(
            &req.id,
            "forbidden",
            format!("STUDENT may not call {}", req.method),
            None,
        ));
    }
    let requested = optional_str(req, "employeeId");
    let target = match (&session.role, requested) {
        (Role::Employee, None) => session.user_id.clone(),
        (Role::Employee, Some(id)) => {
            if id != session.user_id {
                return Err(err(
                    &req.id,
                    "forbidden",
                    "employees may only access their own records",
                    None,
                ));
            }
            id
        }
        (Role::Admin, Some(id)) => id,
        (Role::Admin, None) => {
            return Err(err(&req.id, "bad_params", "missing employeeId", None));
        }
        (Role::Student, _) => unreachable!(),
    };

    let exists = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'EMPLOYEE'",
            [&target],
            |_r| Ok(()),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "employee not found", None));
    }
    Ok(target)
}

/// Month keys are YYYY-MM; the calendar and attendance families share this.
pub fn parse_month_key(req: &Request, key: &str) -> Result<(i32, u32), serde_json::Value> {
    let raw = required_str(req, key)?;
    let bad = || {
        err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM", key),
            None,
        )
    };
    let Some((y, m)) = raw.split_once('-') else {
        return Err(bad());
    };
    let year = y.parse::<i32>().map_err(|_| bad())?;
    let month = m.parse::<u32>().map_err(|_| bad())?;
    if !(1..=12).contains(&month) {
        return Err(bad());
    }
    Ok((year, month))
}

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::gate;
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match gate::db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = match gate::required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match gate::required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row = conn
        .query_row(
            "SELECT id, password_hash, salt, role, sub_role, display_name
             FROM users
             WHERE email = ? AND active = 1",
            [&email],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional();
    let row = match row {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Same error for unknown email and wrong password.
    let Some((user_id, password_hash, salt, role_raw, sub_role, display_name)) = row else {
        return err(&req.id, "unauthorized", "invalid credentials", None);
    };
    if db::hash_password(&salt, &password) != password_hash {
        return err(&req.id, "unauthorized", "invalid credentials", None);
    }
    let Some(role) = Role::parse(&role_raw) else {
        return err(
            &req.id,
            "db_query_failed",
            format!("user {} has unknown role {}", user_id, role_raw),
            None,
        );
    };

    let session = state
        .sessions
        .open(user_id, role, sub_role, display_name);
    ok(
        &req.id,
        json!({
            "session": session.token,
            "userId": session.user_id,
            "role": session.role.as_str(),
            "subRole": session.sub_role,
            "displayName": session.display_name
        }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    state.sessions.close(&session.token);
    ok(&req.id, json!({ "ok": true }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match gate::require_session(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({
            "userId": session.user_id,
            "role": session.role.as_str(),
            "subRole": session.sub_role,
            "displayName": session.display_name
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}

use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::session::SessionStore;

/// One request line. `session` is the bearer credential the client attaches
/// to every call after login; auth-free methods leave it out.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub session: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub sessions: SessionStore,
}

use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// Request-scoped principal supplied by the caller on every request. The
/// daemon trusts the claim and only authorizes against it; authentication
/// happens in the shell.
#[derive(Debug, Deserialize, Clone)]
pub struct Principal {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub actor: Option<Principal>,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

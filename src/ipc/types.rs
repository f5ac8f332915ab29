use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::views::ViewCache;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub caller: Option<CallerClaims>,
}

/// Identity claims as they arrive on the wire. The router turns them into a
/// typed `auth::Caller`; an unrecognized role string resolves to no caller.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CallerClaims {
    pub user_id: String,
    pub role: String,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub views: ViewCache,
}

use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::session::Session;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// An upload in flight. Bytes accumulate in `partial_path` until the caller
/// commits or aborts; the map key is the upload id handed out at begin.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub total_bytes: u64,
    pub expected_sha256: String,
    pub bytes_received: u64,
    pub partial_path: PathBuf,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<Session>,
    pub uploads: HashMap<String, Upload>,
}

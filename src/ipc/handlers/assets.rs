use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request, Upload};
use base64::Engine;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

fn get_required_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn assets_dir(workspace: &std::path::Path) -> PathBuf {
    workspace.join("assets")
}

fn partial_dir(workspace: &std::path::Path) -> PathBuf {
    assets_dir(workspace).join("partial")
}

fn progress_json(upload: &Upload) -> serde_json::Value {
    let percent = if upload.total_bytes == 0 {
        100
    } else {
        (upload.bytes_received * 100 / upload.total_bytes) as u32
    };
    json!({
        "bytesReceived": upload.bytes_received,
        "totalBytes": upload.total_bytes,
        "percent": percent,
    })
}

fn discard(state: &mut AppState, upload_id: &str) {
    if let Some(upload) = state.uploads.remove(upload_id) {
        let _ = std::fs::remove_file(&upload.partial_path);
    }
}

fn handle_upload_begin(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::require_admin(state, &req.id) {
        return resp;
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(file_name) = get_required_str(&req.params, "fileName") else {
        return err(&req.id, "bad_params", "missing fileName", None);
    };
    if file_name.trim().is_empty() || file_name.contains('/') || file_name.contains('\\') {
        return err(&req.id, "bad_params", "fileName must be a bare file name", None);
    }
    let Some(total_bytes) = req.params.get("totalBytes").and_then(|v| v.as_u64()) else {
        return err(&req.id, "bad_params", "missing totalBytes", None);
    };
    let Some(expected_sha256) = get_required_str(&req.params, "sha256") else {
        return err(&req.id, "bad_params", "missing sha256", None);
    };

    let dir = partial_dir(&workspace);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    let upload_id = Uuid::new_v4().to_string();
    let partial_path = dir.join(&upload_id);
    if let Err(e) = std::fs::File::create(&partial_path) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    state.uploads.insert(
        upload_id.clone(),
        Upload {
            file_name: file_name.trim().to_string(),
            total_bytes,
            expected_sha256: expected_sha256.to_lowercase(),
            bytes_received: 0,
            partial_path,
        },
    );
    tracing::debug!(upload_id = %upload_id, total_bytes, "upload started");

    ok(&req.id, json!({ "uploadId": upload_id }))
}

fn handle_upload_chunk(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::require_admin(state, &req.id) {
        return resp;
    }
    let Some(upload_id) = get_required_str(&req.params, "uploadId") else {
        return err(&req.id, "bad_params", "missing uploadId", None);
    };
    let Some(data) = get_required_str(&req.params, "data") else {
        return err(&req.id, "bad_params", "missing data", None);
    };
    let bytes = match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "bad_params", format!("data is not base64: {}", e), None),
    };

    let Some(upload) = state.uploads.get_mut(&upload_id) else {
        return err(&req.id, "not_found", "unknown upload id", None);
    };

    if upload.bytes_received + bytes.len() as u64 > upload.total_bytes {
        // The stream is corrupt; drop everything rather than keep a partial
        // file that can never commit.
        discard(state, &upload_id);
        return err(
            &req.id,
            "chunk_overflow",
            "received more bytes than announced; upload discarded",
            None,
        );
    }

    let append = std::fs::OpenOptions::new()
        .append(true)
        .open(&upload.partial_path)
        .and_then(|mut f| f.write_all(&bytes));
    if let Err(e) = append {
        discard(state, &upload_id);
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    upload.bytes_received += bytes.len() as u64;
    ok(&req.id, progress_json(upload))
}

fn handle_upload_abort(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::require_admin(state, &req.id) {
        return resp;
    }
    let Some(upload_id) = get_required_str(&req.params, "uploadId") else {
        return err(&req.id, "bad_params", "missing uploadId", None);
    };
    if !state.uploads.contains_key(&upload_id) {
        return err(&req.id, "not_found", "unknown upload id", None);
    }
    discard(state, &upload_id);
    tracing::debug!(upload_id = %upload_id, "upload aborted");
    ok(&req.id, json!({ "aborted": true }))
}

fn handle_upload_commit(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::require_admin(state, &req.id) {
        return resp;
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(upload_id) = get_required_str(&req.params, "uploadId") else {
        return err(&req.id, "bad_params", "missing uploadId", None);
    };
    let Some(upload) = state.uploads.get(&upload_id).cloned() else {
        return err(&req.id, "not_found", "unknown upload id", None);
    };

    if upload.bytes_received != upload.total_bytes {
        // Not discarded: the caller may still send the remaining chunks.
        return err(
            &req.id,
            "upload_incomplete",
            format!(
                "received {} of {} bytes",
                upload.bytes_received, upload.total_bytes
            ),
            None,
        );
    }

    let bytes = match std::fs::read(&upload.partial_path) {
        Ok(b) => b,
        Err(e) => {
            discard(state, &upload_id);
            return err(&req.id, "io_failed", e.to_string(), None);
        }
    };
    let actual = hex::encode(Sha256::digest(&bytes));
    if actual != upload.expected_sha256 {
        discard(state, &upload_id);
        return err(
            &req.id,
            "checksum_mismatch",
            format!("expected {}, got {}", upload.expected_sha256, actual),
            None,
        );
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let asset_id = Uuid::new_v4().to_string();
    let final_path = assets_dir(&workspace).join(&asset_id);
    if let Err(e) = std::fs::rename(&upload.partial_path, &final_path) {
        discard(state, &upload_id);
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO assets(id, file_name, byte_len, sha256, created_at)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![
            &asset_id,
            &upload.file_name,
            upload.total_bytes as i64,
            &actual,
            &created_at,
        ],
    ) {
        let _ = std::fs::remove_file(&final_path);
        state.uploads.remove(&upload_id);
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assets" })),
        );
    }

    state.uploads.remove(&upload_id);
    tracing::info!(asset_id = %asset_id, file_name = %upload.file_name, "asset stored");

    ok(
        &req.id,
        json!({
            "asset": {
                "id": asset_id,
                "fileName": upload.file_name,
                "byteLen": upload.total_bytes,
                "sha256": actual,
                "createdAt": created_at,
            }
        }),
    )
}

fn handle_assets_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::require_admin(state, &req.id) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, file_name, byte_len, sha256, created_at FROM assets ORDER BY created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "fileName": row.get::<_, String>(1)?,
                "byteLen": row.get::<_, i64>(2)?,
                "sha256": row.get::<_, String>(3)?,
                "createdAt": row.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assets) => ok(&req.id, json!({ "assets": assets })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assets.uploadBegin" => Some(handle_upload_begin(state, req)),
        "assets.uploadChunk" => Some(handle_upload_chunk(state, req)),
        "assets.uploadAbort" => Some(handle_upload_abort(state, req)),
        "assets.uploadCommit" => Some(handle_upload_commit(state, req)),
        "assets.list" => Some(handle_assets_list(state, req)),
        _ => None,
    }
}

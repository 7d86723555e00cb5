use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::require_admin(state, &req.id) {
        return resp;
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(out_path) = req.params.get("outPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };

    match backup::export_workspace_bundle(&workspace, &PathBuf::from(out_path)) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
                "outPath": out_path,
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:#}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::require_admin(state, &req.id) {
        return resp;
    }
    let Some(in_path) = req.params.get("inPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };
    let workspace_path = match req.params.get("workspacePath").and_then(|v| v.as_str()) {
        Some(p) => PathBuf::from(p),
        None => match state.workspace.clone() {
            Some(w) => w,
            None => return err(&req.id, "bad_params", "missing workspacePath", None),
        },
    };

    // Restoring over the open workspace replaces the database file; drop the
    // stale connection and make the caller re-select.
    let reopen_required = state.workspace.as_deref() == Some(workspace_path.as_path());
    if reopen_required {
        state.db = None;
        state.session = None;
        state.uploads.clear();
    }

    match backup::import_workspace_bundle(&PathBuf::from(in_path), &workspace_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormatDetected": summary.bundle_format_detected,
                "workspacePath": workspace_path.to_string_lossy(),
                "reopenRequired": reopen_required,
            }),
        ),
        Err(e) => err(&req.id, "backup_import_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}

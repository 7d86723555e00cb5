use base64::Engine;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn open_workspace_as_admin(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "boot",
        "admins.create",
        json!({ "name": "Dana Reis", "email": "dana@escola.test" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "email": "dana@escola.test" }),
    );
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[test]
fn chunked_upload_reports_progress_and_commits() {
    let workspace = temp_dir("schoold-upload");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace_as_admin(&mut stdin, &mut reader, &workspace);

    let payload: Vec<u8> = (0..1000u32).flat_map(|i| i.to_le_bytes()).collect();
    let sha = hex::encode(Sha256::digest(&payload));

    let begin = request_ok(
        &mut stdin,
        &mut reader,
        "ub",
        "assets.uploadBegin",
        json!({
            "fileName": "cover.png",
            "totalBytes": payload.len(),
            "sha256": sha
        }),
    );
    let upload_id = begin
        .get("uploadId")
        .and_then(|v| v.as_str())
        .expect("uploadId");

    // Two equal chunks: the per-chunk responses are the progress stream.
    let half = payload.len() / 2;
    let p1 = request_ok(
        &mut stdin,
        &mut reader,
        "uc1",
        "assets.uploadChunk",
        json!({ "uploadId": upload_id, "data": b64(&payload[..half]) }),
    );
    assert_eq!(p1.get("percent").and_then(|v| v.as_u64()), Some(50));
    assert_eq!(
        p1.get("bytesReceived").and_then(|v| v.as_u64()),
        Some(half as u64)
    );

    let p2 = request_ok(
        &mut stdin,
        &mut reader,
        "uc2",
        "assets.uploadChunk",
        json!({ "uploadId": upload_id, "data": b64(&payload[half..]) }),
    );
    assert_eq!(p2.get("percent").and_then(|v| v.as_u64()), Some(100));

    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "uf",
        "assets.uploadCommit",
        json!({ "uploadId": upload_id }),
    );
    let asset = committed.get("asset").expect("asset");
    let asset_id = asset.get("id").and_then(|v| v.as_str()).expect("asset id");
    assert_eq!(asset.get("fileName").and_then(|v| v.as_str()), Some("cover.png"));
    assert_eq!(asset.get("sha256").and_then(|v| v.as_str()), Some(sha.as_str()));

    let stored = std::fs::read(workspace.join("assets").join(asset_id)).expect("stored asset");
    assert_eq!(stored, payload);

    let listed = request_ok(&mut stdin, &mut reader, "al", "assets.list", json!({}));
    assert_eq!(
        listed.get("assets").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
}

#[test]
fn commit_before_all_bytes_is_refused_but_recoverable() {
    let workspace = temp_dir("schoold-upload-incomplete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace_as_admin(&mut stdin, &mut reader, &workspace);

    let payload = b"half now, half later".to_vec();
    let sha = hex::encode(Sha256::digest(&payload));
    let begin = request_ok(
        &mut stdin,
        &mut reader,
        "ub",
        "assets.uploadBegin",
        json!({ "fileName": "notes.txt", "totalBytes": payload.len(), "sha256": sha }),
    );
    let upload_id = begin
        .get("uploadId")
        .and_then(|v| v.as_str())
        .expect("uploadId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "uc1",
        "assets.uploadChunk",
        json!({ "uploadId": upload_id, "data": b64(&payload[..8]) }),
    );
    let early = request(
        &mut stdin,
        &mut reader,
        "uf1",
        "assets.uploadCommit",
        json!({ "uploadId": upload_id }),
    );
    assert_eq!(error_code(&early), "upload_incomplete");

    // The refusal keeps the partial alive; the rest can still arrive.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "uc2",
        "assets.uploadChunk",
        json!({ "uploadId": upload_id, "data": b64(&payload[8..]) }),
    );
    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "uf2",
        "assets.uploadCommit",
        json!({ "uploadId": upload_id }),
    );
    assert!(committed.get("asset").is_some());
}

#[test]
fn abort_discards_the_partial_upload() {
    let workspace = temp_dir("schoold-upload-abort");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace_as_admin(&mut stdin, &mut reader, &workspace);

    let payload = b"to be abandoned".to_vec();
    let sha = hex::encode(Sha256::digest(&payload));
    let begin = request_ok(
        &mut stdin,
        &mut reader,
        "ub",
        "assets.uploadBegin",
        json!({ "fileName": "scrap.bin", "totalBytes": payload.len(), "sha256": sha }),
    );
    let upload_id = begin
        .get("uploadId")
        .and_then(|v| v.as_str())
        .expect("uploadId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "uc1",
        "assets.uploadChunk",
        json!({ "uploadId": upload_id, "data": b64(&payload[..4]) }),
    );
    let aborted = request_ok(
        &mut stdin,
        &mut reader,
        "ua",
        "assets.uploadAbort",
        json!({ "uploadId": upload_id }),
    );
    assert_eq!(aborted.get("aborted").and_then(|v| v.as_bool()), Some(true));

    // The id is dead and the partial file is gone.
    let late = request(
        &mut stdin,
        &mut reader,
        "uc2",
        "assets.uploadChunk",
        json!({ "uploadId": upload_id, "data": b64(&payload[4..]) }),
    );
    assert_eq!(error_code(&late), "not_found");
    assert!(!workspace
        .join("assets")
        .join("partial")
        .join(&upload_id)
        .exists());

    let listed = request_ok(&mut stdin, &mut reader, "al", "assets.list", json!({}));
    assert_eq!(
        listed.get("assets").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn checksum_mismatch_discards_the_upload() {
    let workspace = temp_dir("schoold-upload-checksum");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace_as_admin(&mut stdin, &mut reader, &workspace);

    let payload = b"actual bytes".to_vec();
    let wrong_sha = hex::encode(Sha256::digest(b"different bytes"));
    let begin = request_ok(
        &mut stdin,
        &mut reader,
        "ub",
        "assets.uploadBegin",
        json!({ "fileName": "bad.bin", "totalBytes": payload.len(), "sha256": wrong_sha }),
    );
    let upload_id = begin
        .get("uploadId")
        .and_then(|v| v.as_str())
        .expect("uploadId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "uc1",
        "assets.uploadChunk",
        json!({ "uploadId": upload_id, "data": b64(&payload) }),
    );
    let committed = request(
        &mut stdin,
        &mut reader,
        "uf",
        "assets.uploadCommit",
        json!({ "uploadId": upload_id }),
    );
    assert_eq!(error_code(&committed), "checksum_mismatch");

    let listed = request_ok(&mut stdin, &mut reader, "al", "assets.list", json!({}));
    assert_eq!(
        listed.get("assets").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn oversized_chunk_kills_the_upload() {
    let workspace = temp_dir("schoold-upload-overflow");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace_as_admin(&mut stdin, &mut reader, &workspace);

    let payload = b"0123456789".to_vec();
    let sha = hex::encode(Sha256::digest(&payload));
    let begin = request_ok(
        &mut stdin,
        &mut reader,
        "ub",
        "assets.uploadBegin",
        json!({ "fileName": "tiny.bin", "totalBytes": 4, "sha256": sha }),
    );
    let upload_id = begin
        .get("uploadId")
        .and_then(|v| v.as_str())
        .expect("uploadId")
        .to_string();

    let overflow = request(
        &mut stdin,
        &mut reader,
        "uc1",
        "assets.uploadChunk",
        json!({ "uploadId": upload_id, "data": b64(&payload) }),
    );
    assert_eq!(error_code(&overflow), "chunk_overflow");

    let gone = request(
        &mut stdin,
        &mut reader,
        "uc2",
        "assets.uploadChunk",
        json!({ "uploadId": upload_id, "data": b64(&payload[..2]) }),
    );
    assert_eq!(error_code(&gone), "not_found");
}

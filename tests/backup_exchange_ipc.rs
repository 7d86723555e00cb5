use serde_json::json;
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

#[test]
fn bundle_round_trip_carries_the_workspace_data() {
    let workspace = temp_dir("schoold-exchange-src");
    let restored = temp_dir("schoold-exchange-dst");
    let out_dir = temp_dir("schoold-exchange-out");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "boot",
        "admins.create",
        json!({ "name": "Dana Reis", "email": "dana@escola.test" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "auth.login",
        json!({ "email": "dana@escola.test" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "name": "Turma A" }),
    );

    let bundle_path = out_dir.join("escola.schoolbackup.zip");
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "ex",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        export.get("bundleFormat").and_then(|v| v.as_str()),
        Some("school-workspace-v1")
    );
    assert!(bundle_path.is_file());

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "im",
        "backup.import",
        json!({
            "inPath": bundle_path.to_string_lossy(),
            "workspacePath": restored.to_string_lossy()
        }),
    );
    assert_eq!(
        import.get("reopenRequired").and_then(|v| v.as_bool()),
        Some(false)
    );

    // The restored workspace opens with the exported content intact.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws2",
        "workspace.select",
        json!({ "path": restored.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login2",
        "auth.login",
        json!({ "email": "dana@escola.test" }),
    );
    let classes = request_ok(&mut stdin, &mut reader, "cl", "classes.list", json!({}));
    let names: Vec<&str> = classes["classes"]
        .as_array()
        .expect("classes")
        .iter()
        .filter_map(|c| c.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names, vec!["Turma A"]);
}

#[test]
fn in_place_restore_forces_a_reopen() {
    let workspace = temp_dir("schoold-exchange-inplace");
    let out_dir = temp_dir("schoold-exchange-inplace-out");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "boot",
        "admins.create",
        json!({ "name": "Dana Reis", "email": "dana@escola.test" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "auth.login",
        json!({ "email": "dana@escola.test" }),
    );

    let bundle_path = out_dir.join("snapshot.zip");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ex",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "im",
        "backup.import",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        import.get("reopenRequired").and_then(|v| v.as_bool()),
        Some(true)
    );

    // Connection and session were dropped with the replaced database file.
    let denied = request(
        &mut stdin,
        &mut reader,
        "cl",
        "classes.list",
        json!({}),
    );
    assert_eq!(
        denied["error"]["code"].as_str(),
        Some("no_session")
    );
}

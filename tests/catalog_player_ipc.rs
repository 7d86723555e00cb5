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

#[test]
fn book_structure_round_trip_with_ordering() {
    let workspace = temp_dir("schoold-catalog");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace_as_admin(&mut stdin, &mut reader, &workspace);

    let book = request_ok(
        &mut stdin,
        &mut reader,
        "b1",
        "books.create",
        json!({ "title": "Movers 1", "level": "A1" }),
    );
    let book_id = book.get("bookId").and_then(|v| v.as_str()).expect("bookId");

    let unit1 = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "units.add",
        json!({ "bookId": book_id, "title": "Unit 1 - Greetings" }),
    );
    let unit1_id = unit1.get("unitId").and_then(|v| v.as_str()).expect("unitId");
    let unit2 = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "units.add",
        json!({ "bookId": book_id, "title": "Unit 2 - Family" }),
    );
    let unit2_id = unit2.get("unitId").and_then(|v| v.as_str()).expect("unitId");

    let lesson1 = request_ok(
        &mut stdin,
        &mut reader,
        "le1",
        "lessons.add",
        json!({ "unitId": unit1_id, "title": "Hello!" }),
    );
    let lesson1_id = lesson1
        .get("lessonId")
        .and_then(|v| v.as_str())
        .expect("lessonId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "le2",
        "lessons.add",
        json!({ "unitId": unit1_id, "title": "Goodbye!" }),
    );

    let outline = request_ok(
        &mut stdin,
        &mut reader,
        "o1",
        "player.bookOutline",
        json!({ "bookId": book_id }),
    );
    let units = outline.get("units").and_then(|v| v.as_array()).expect("units");
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].get("id").and_then(|v| v.as_str()), Some(unit1_id));
    assert_eq!(
        units[0]
            .get("lessons")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );

    // Reverse the unit order and confirm the outline follows.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "units.reorder",
        json!({ "bookId": book_id, "unitIds": [unit2_id, unit1_id] }),
    );
    let outline = request_ok(
        &mut stdin,
        &mut reader,
        "o2",
        "player.bookOutline",
        json!({ "bookId": book_id }),
    );
    let units = outline.get("units").and_then(|v| v.as_array()).expect("units");
    assert_eq!(units[0].get("id").and_then(|v| v.as_str()), Some(unit2_id));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cs1",
        "contents.set",
        json!({
            "lessonId": lesson1_id,
            "contents": [
                { "kind": "text", "title": "Texto de Apoio", "data": "Hello, class!" },
                { "kind": "video", "title": "Vídeo Aula", "data": "https://www.youtube.com/watch?v=dQw4w9WgXcQ" },
                { "kind": "audio", "data": "https://cdn.escola.test/audio/hello.mp3" }
            ]
        }),
    );

    let lesson = request_ok(
        &mut stdin,
        &mut reader,
        "pl1",
        "player.lesson",
        json!({ "lessonId": lesson1_id }),
    );
    let contents = lesson
        .get("contents")
        .and_then(|v| v.as_array())
        .expect("contents");
    assert_eq!(contents.len(), 3);
    assert_eq!(
        contents[0].get("kind").and_then(|v| v.as_str()),
        Some("text")
    );
    assert!(contents[0].get("video").is_none());

    let video = &contents[1];
    assert_eq!(
        video
            .get("video")
            .and_then(|v| v.get("source"))
            .and_then(|v| v.as_str()),
        Some("embed")
    );
    assert_eq!(
        video
            .get("video")
            .and_then(|v| v.get("url"))
            .and_then(|v| v.as_str()),
        Some("https://www.youtube.com/embed/dQw4w9WgXcQ")
    );

    let bad = request(
        &mut stdin,
        &mut reader,
        "cs2",
        "contents.set",
        json!({
            "lessonId": lesson1_id,
            "contents": [{ "kind": "hologram", "data": "x" }]
        }),
    );
    assert_eq!(bad.get("ok").and_then(|v| v.as_bool()), Some(false));

    // Replacement is wholesale: the bad call above must not have clobbered
    // the stored blocks.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "cl1",
        "contents.list",
        json!({ "lessonId": lesson1_id }),
    );
    assert_eq!(
        listed
            .get("contents")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(3)
    );
}

#[test]
fn deleting_a_book_removes_its_whole_tree() {
    let workspace = temp_dir("schoold-catalog-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace_as_admin(&mut stdin, &mut reader, &workspace);

    let book = request_ok(
        &mut stdin,
        &mut reader,
        "b1",
        "books.create",
        json!({ "title": "Flyers 2" }),
    );
    let book_id = book.get("bookId").and_then(|v| v.as_str()).expect("bookId");
    let unit = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "units.add",
        json!({ "bookId": book_id, "title": "Unit 1" }),
    );
    let unit_id = unit.get("unitId").and_then(|v| v.as_str()).expect("unitId");
    let lesson = request_ok(
        &mut stdin,
        &mut reader,
        "le1",
        "lessons.add",
        json!({ "unitId": unit_id, "title": "Lesson 1" }),
    );
    let lesson_id = lesson
        .get("lessonId")
        .and_then(|v| v.as_str())
        .expect("lessonId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cs1",
        "contents.set",
        json!({
            "lessonId": lesson_id,
            "contents": [{ "kind": "text", "data": "body" }]
        }),
    );

    // A class and a student point at the book; deletion must detach them.
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "name": "Turma B", "bookId": book_id }),
    );
    let class_id = class.get("classId").and_then(|v| v.as_str()).expect("classId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "name": "Bruno Lima", "classId": class_id, "currentBookId": book_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "books.delete",
        json!({ "bookId": book_id }),
    );

    let books = request_ok(&mut stdin, &mut reader, "bl", "books.list", json!({}));
    assert_eq!(
        books.get("books").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "o1",
        "player.bookOutline",
        json!({ "bookId": book_id }),
    );
    assert_eq!(gone.get("ok").and_then(|v| v.as_bool()), Some(false));

    // Detached, not deleted.
    let classes = request_ok(&mut stdin, &mut reader, "cl", "classes.list", json!({}));
    let class_row = &classes["classes"][0];
    assert!(class_row.get("bookId").map(|v| v.is_null()).unwrap_or(false));
    let students = request_ok(&mut stdin, &mut reader, "sl", "students.list", json!({}));
    let student_row = &students["students"][0];
    assert!(student_row
        .get("currentBookId")
        .map(|v| v.is_null())
        .unwrap_or(false));
}

#[test]
fn lesson_delete_cascades_contents() {
    let workspace = temp_dir("schoold-catalog-lesson-del");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace_as_admin(&mut stdin, &mut reader, &workspace);

    let book = request_ok(
        &mut stdin,
        &mut reader,
        "b1",
        "books.create",
        json!({ "title": "Starters" }),
    );
    let book_id = book.get("bookId").and_then(|v| v.as_str()).expect("bookId");
    let unit = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "units.add",
        json!({ "bookId": book_id, "title": "Unit 1" }),
    );
    let unit_id = unit.get("unitId").and_then(|v| v.as_str()).expect("unitId");
    let lesson = request_ok(
        &mut stdin,
        &mut reader,
        "le1",
        "lessons.add",
        json!({ "unitId": unit_id, "title": "Lesson 1" }),
    );
    let lesson_id = lesson
        .get("lessonId")
        .and_then(|v| v.as_str())
        .expect("lessonId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cs1",
        "contents.set",
        json!({
            "lessonId": lesson_id,
            "contents": [{ "kind": "text", "data": "body" }]
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "dl1",
        "lessons.delete",
        json!({ "lessonId": lesson_id }),
    );
    let listed = request(
        &mut stdin,
        &mut reader,
        "cl1",
        "contents.list",
        json!({ "lessonId": lesson_id }),
    );
    assert_eq!(listed.get("ok").and_then(|v| v.as_bool()), Some(false));

    let outline = request_ok(
        &mut stdin,
        &mut reader,
        "o1",
        "player.bookOutline",
        json!({ "bookId": book_id }),
    );
    assert_eq!(
        outline["units"][0]
            .get("lessons")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::media;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: impl ToString) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

fn not_found(what: &str) -> HandlerErr {
    HandlerErr {
        code: "not_found",
        message: format!("{} not found", what),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_err)
}

fn next_sort_order(conn: &Connection, sql: &str, parent_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [parent_id], |r| r.get::<_, Option<i64>>(0))
        .map(|v| v.unwrap_or(-1) + 1)
        .map_err(db_err)
}

fn books_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               b.id, b.title, b.description, b.level, b.cover_asset_id, b.created_at,
               (SELECT COUNT(*) FROM units u WHERE u.book_id = b.id) AS unit_count
             FROM books b
             ORDER BY b.title",
        )
        .map_err(db_err)?;
    let books = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?,
                "level": row.get::<_, Option<String>>(3)?,
                "coverAssetId": row.get::<_, Option<String>>(4)?,
                "createdAt": row.get::<_, String>(5)?,
                "unitCount": row.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "books": books }))
}

fn books_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(bad_params("title must not be empty"));
    }
    let book_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO books(id, title, description, cover_asset_id, level, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &book_id,
            title.trim(),
            get_optional_str(params, "description"),
            get_optional_str(params, "coverAssetId"),
            get_optional_str(params, "level"),
            &created_at,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "books" })),
    })?;
    Ok(json!({ "bookId": book_id }))
}

fn books_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let book_id = get_required_str(params, "bookId")?;
    if !row_exists(conn, "SELECT 1 FROM books WHERE id = ?", &book_id)? {
        return Err(not_found("book"));
    }
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(bad_params("title must not be empty"));
    }
    conn.execute(
        "UPDATE books SET title = ?, description = ?, cover_asset_id = ?, level = ? WHERE id = ?",
        rusqlite::params![
            title.trim(),
            get_optional_str(params, "description"),
            get_optional_str(params, "coverAssetId"),
            get_optional_str(params, "level"),
            &book_id,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "books" })),
    })?;
    Ok(json!({ "bookId": book_id }))
}

fn books_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let book_id = get_required_str(params, "bookId")?;
    if !row_exists(conn, "SELECT 1 FROM books WHERE id = ?", &book_id)? {
        return Err(not_found("book"));
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    // Content tree bottom-up, then detach the rows that only point at the
    // book, then the book itself.
    let steps: [(&str, &str); 7] = [
        (
            "DELETE FROM contents WHERE lesson_id IN (
               SELECT l.id FROM lessons l
               JOIN units u ON u.id = l.unit_id
               WHERE u.book_id = ?
             )",
            "contents",
        ),
        (
            "DELETE FROM lessons WHERE unit_id IN (SELECT id FROM units WHERE book_id = ?)",
            "lessons",
        ),
        ("DELETE FROM units WHERE book_id = ?", "units"),
        (
            "UPDATE classes SET book_id = NULL WHERE book_id = ?",
            "classes",
        ),
        (
            "UPDATE students SET current_book_id = NULL WHERE current_book_id = ?",
            "students",
        ),
        (
            "UPDATE class_sessions SET book_id = NULL WHERE book_id = ?",
            "class_sessions",
        ),
        ("DELETE FROM books WHERE id = ?", "books"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&book_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "ok": true }))
}

fn units_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let book_id = get_required_str(params, "bookId")?;
    if !row_exists(conn, "SELECT 1 FROM books WHERE id = ?", &book_id)? {
        return Err(not_found("book"));
    }
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(bad_params("title must not be empty"));
    }
    let sort_order = next_sort_order(
        conn,
        "SELECT MAX(sort_order) FROM units WHERE book_id = ?",
        &book_id,
    )?;
    let unit_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO units(id, book_id, title, sort_order) VALUES(?, ?, ?, ?)",
        rusqlite::params![&unit_id, &book_id, title.trim(), sort_order],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "units" })),
    })?;
    Ok(json!({ "unitId": unit_id, "sortOrder": sort_order }))
}

fn units_rename(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let unit_id = get_required_str(params, "unitId")?;
    if !row_exists(conn, "SELECT 1 FROM units WHERE id = ?", &unit_id)? {
        return Err(not_found("unit"));
    }
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(bad_params("title must not be empty"));
    }
    conn.execute(
        "UPDATE units SET title = ? WHERE id = ?",
        (title.trim(), &unit_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "units" })),
    })?;
    Ok(json!({ "unitId": unit_id }))
}

fn units_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let unit_id = get_required_str(params, "unitId")?;
    if !row_exists(conn, "SELECT 1 FROM units WHERE id = ?", &unit_id)? {
        return Err(not_found("unit"));
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let steps: [(&str, &str); 3] = [
        (
            "DELETE FROM contents WHERE lesson_id IN (SELECT id FROM lessons WHERE unit_id = ?)",
            "contents",
        ),
        ("DELETE FROM lessons WHERE unit_id = ?", "lessons"),
        ("DELETE FROM units WHERE id = ?", "units"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&unit_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "ok": true }))
}

fn reorder(
    conn: &Connection,
    ids: &[String],
    check_sql: &str,
    parent_id: &str,
    update_sql: &str,
    table: &str,
) -> Result<(), HandlerErr> {
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (i, id) in ids.iter().enumerate() {
        let belongs: Option<i64> = tx
            .query_row(check_sql, (id, parent_id), |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        if belongs.is_none() {
            let _ = tx.rollback();
            return Err(bad_params(format!("{} {} does not belong here", table, id)));
        }
        tx.execute(update_sql, (i as i64, id)).map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })
}

fn ids_param(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>()
        })
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

fn units_reorder(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let book_id = get_required_str(params, "bookId")?;
    let unit_ids = ids_param(params, "unitIds")?;
    reorder(
        conn,
        &unit_ids,
        "SELECT 1 FROM units WHERE id = ? AND book_id = ?",
        &book_id,
        "UPDATE units SET sort_order = ? WHERE id = ?",
        "units",
    )?;
    Ok(json!({ "ok": true }))
}

fn lessons_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let unit_id = get_required_str(params, "unitId")?;
    if !row_exists(conn, "SELECT 1 FROM units WHERE id = ?", &unit_id)? {
        return Err(not_found("unit"));
    }
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(bad_params("title must not be empty"));
    }
    let sort_order = next_sort_order(
        conn,
        "SELECT MAX(sort_order) FROM lessons WHERE unit_id = ?",
        &unit_id,
    )?;
    let lesson_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, unit_id, title, sort_order) VALUES(?, ?, ?, ?)",
        rusqlite::params![&lesson_id, &unit_id, title.trim(), sort_order],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "lessons" })),
    })?;
    Ok(json!({ "lessonId": lesson_id, "sortOrder": sort_order }))
}

fn lessons_rename(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;
    if !row_exists(conn, "SELECT 1 FROM lessons WHERE id = ?", &lesson_id)? {
        return Err(not_found("lesson"));
    }
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(bad_params("title must not be empty"));
    }
    conn.execute(
        "UPDATE lessons SET title = ? WHERE id = ?",
        (title.trim(), &lesson_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "lessons" })),
    })?;
    Ok(json!({ "lessonId": lesson_id }))
}

fn lessons_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;
    if !row_exists(conn, "SELECT 1 FROM lessons WHERE id = ?", &lesson_id)? {
        return Err(not_found("lesson"));
    }
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (sql, table) in [
        ("DELETE FROM contents WHERE lesson_id = ?", "contents"),
        ("DELETE FROM lessons WHERE id = ?", "lessons"),
    ] {
        if let Err(e) = tx.execute(sql, [&lesson_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "ok": true }))
}

fn lessons_reorder(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let unit_id = get_required_str(params, "unitId")?;
    let lesson_ids = ids_param(params, "lessonIds")?;
    reorder(
        conn,
        &lesson_ids,
        "SELECT 1 FROM lessons WHERE id = ? AND unit_id = ?",
        &unit_id,
        "UPDATE lessons SET sort_order = ? WHERE id = ?",
        "lessons",
    )?;
    Ok(json!({ "ok": true }))
}

fn contents_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;
    if !row_exists(conn, "SELECT 1 FROM lessons WHERE id = ?", &lesson_id)? {
        return Err(not_found("lesson"));
    }
    let blocks = params
        .get("contents")
        .and_then(|v| v.as_array())
        .ok_or_else(|| bad_params("missing contents"))?;

    struct Block {
        kind: String,
        title: Option<String>,
        data: String,
    }
    let mut parsed: Vec<Block> = Vec::with_capacity(blocks.len());
    for (i, block) in blocks.iter().enumerate() {
        let kind = block
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| bad_params(format!("contents[{}] missing kind", i)))?;
        if !matches!(kind, "text" | "video" | "audio") {
            return Err(bad_params(format!(
                "contents[{}] kind must be text, video or audio",
                i
            )));
        }
        let data = block
            .get("data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| bad_params(format!("contents[{}] missing data", i)))?;
        parsed.push(Block {
            kind: kind.to_string(),
            title: block
                .get("title")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            data: data.to_string(),
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    if let Err(e) = tx.execute("DELETE FROM contents WHERE lesson_id = ?", [&lesson_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "contents" })),
        });
    }
    for (i, block) in parsed.iter().enumerate() {
        let content_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO contents(id, lesson_id, kind, title, data, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                &content_id,
                &lesson_id,
                &block.kind,
                &block.title,
                &block.data,
                i as i64
            ],
        ) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "contents" })),
            });
        }
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "lessonId": lesson_id, "count": parsed.len() }))
}

fn content_rows(conn: &Connection, lesson_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, kind, title, data, sort_order
             FROM contents WHERE lesson_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    stmt.query_map([lesson_id], |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "kind": row.get::<_, String>(1)?,
            "title": row.get::<_, Option<String>>(2)?,
            "data": row.get::<_, String>(3)?,
            "sortOrder": row.get::<_, i64>(4)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn contents_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;
    if !row_exists(conn, "SELECT 1 FROM lessons WHERE id = ?", &lesson_id)? {
        return Err(not_found("lesson"));
    }
    Ok(json!({ "contents": content_rows(conn, &lesson_id)? }))
}

fn player_book_outline(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let book_id = get_required_str(params, "bookId")?;
    let book = conn
        .query_row(
            "SELECT id, title, description, level FROM books WHERE id = ?",
            [&book_id],
            |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "title": row.get::<_, String>(1)?,
                    "description": row.get::<_, Option<String>>(2)?,
                    "level": row.get::<_, Option<String>>(3)?,
                }))
            },
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| not_found("book"))?;

    let mut unit_stmt = conn
        .prepare("SELECT id, title FROM units WHERE book_id = ? ORDER BY sort_order")
        .map_err(db_err)?;
    let units: Vec<(String, String)> = unit_stmt
        .query_map([&book_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut lesson_stmt = conn
        .prepare("SELECT id, title FROM lessons WHERE unit_id = ? ORDER BY sort_order")
        .map_err(db_err)?;
    let mut units_json = Vec::with_capacity(units.len());
    for (unit_id, unit_title) in units {
        let lessons = lesson_stmt
            .query_map([&unit_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        units_json.push(json!({
            "id": unit_id,
            "title": unit_title,
            "lessons": lessons,
        }));
    }

    Ok(json!({ "book": book, "units": units_json }))
}

fn player_lesson(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;
    let lesson = conn
        .query_row(
            "SELECT l.id, l.title, u.id, u.book_id FROM lessons l
             JOIN units u ON u.id = l.unit_id
             WHERE l.id = ?",
            [&lesson_id],
            |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "title": row.get::<_, String>(1)?,
                    "unitId": row.get::<_, String>(2)?,
                    "bookId": row.get::<_, String>(3)?,
                }))
            },
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| not_found("lesson"))?;

    let contents: Vec<serde_json::Value> = content_rows(conn, &lesson_id)?
        .into_iter()
        .map(|mut block| {
            let is_video = block.get("kind").and_then(|v| v.as_str()) == Some("video");
            if is_video {
                let url = block
                    .get("data")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let source = media::resolve_video_url(&url);
                block["video"] = json!({
                    "source": source.kind(),
                    "url": source.url(),
                });
            }
            block
        })
        .collect();

    Ok(json!({ "lesson": lesson, "contents": contents }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    admin_only: bool,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let gate = if admin_only {
        helpers::require_admin(state, &req.id)
    } else {
        helpers::require_session(state, &req.id)
    };
    if let Err(resp) = gate {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "books.list" => Some(with_conn(state, req, true, books_list)),
        "books.create" => Some(with_conn(state, req, true, books_create)),
        "books.update" => Some(with_conn(state, req, true, books_update)),
        "books.delete" => Some(with_conn(state, req, true, books_delete)),
        "units.add" => Some(with_conn(state, req, true, units_add)),
        "units.rename" => Some(with_conn(state, req, true, units_rename)),
        "units.delete" => Some(with_conn(state, req, true, units_delete)),
        "units.reorder" => Some(with_conn(state, req, true, units_reorder)),
        "lessons.add" => Some(with_conn(state, req, true, lessons_add)),
        "lessons.rename" => Some(with_conn(state, req, true, lessons_rename)),
        "lessons.delete" => Some(with_conn(state, req, true, lessons_delete)),
        "lessons.reorder" => Some(with_conn(state, req, true, lessons_reorder)),
        "contents.set" => Some(with_conn(state, req, true, contents_set)),
        "contents.list" => Some(with_conn(state, req, true, contents_list)),
        "player.bookOutline" => Some(with_conn(state, req, false, player_book_outline)),
        "player.lesson" => Some(with_conn(state, req, false, player_lesson)),
        _ => None,
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
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

fn sessions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if student_exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let date = get_required_str(params, "date")?;
    if chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return Err(bad_params("date must be an ISO date (YYYY-MM-DD)"));
    }
    let book_id = get_optional_str(params, "bookId");
    if let Some(ref bid) = book_id {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM books WHERE id = ?", [bid], |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(HandlerErr {
                code: "not_found",
                message: "book not found".to_string(),
                details: None,
            });
        }
    }

    let session_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO class_sessions(id, student_id, book_id, date, time, lesson, warmer,
                                    hw_correction, notes, next_homework, teacher)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &session_id,
            &student_id,
            &book_id,
            &date,
            get_optional_str(params, "time"),
            get_optional_str(params, "lesson"),
            get_optional_str(params, "warmer"),
            get_optional_str(params, "hwCorrection"),
            get_optional_str(params, "notes"),
            get_optional_str(params, "nextHomework"),
            get_optional_str(params, "teacher"),
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "class_sessions" })),
    })?;

    Ok(json!({ "sessionId": session_id }))
}

fn sessions_list_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    // Recent-history panel wants the last handful, newest first.
    let limit = params
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(5)
        .min(100) as i64;

    let mut stmt = conn
        .prepare(
            "SELECT id, book_id, date, time, lesson, warmer, hw_correction, notes,
                    next_homework, teacher
             FROM class_sessions
             WHERE student_id = ?
             ORDER BY date DESC, time DESC
             LIMIT ?",
        )
        .map_err(db_err)?;
    let sessions = stmt
        .query_map((&student_id, limit), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "bookId": row.get::<_, Option<String>>(1)?,
                "date": row.get::<_, String>(2)?,
                "time": row.get::<_, Option<String>>(3)?,
                "lesson": row.get::<_, Option<String>>(4)?,
                "warmer": row.get::<_, Option<String>>(5)?,
                "hwCorrection": row.get::<_, Option<String>>(6)?,
                "notes": row.get::<_, Option<String>>(7)?,
                "nextHomework": row.get::<_, Option<String>>(8)?,
                "teacher": row.get::<_, Option<String>>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "sessions": sessions }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    if let Err(resp) = helpers::require_admin(state, &req.id) {
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
        "sessions.create" => Some(with_conn(state, req, sessions_create)),
        "sessions.listForStudent" => Some(with_conn(state, req, sessions_list_for_student)),
        _ => None,
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::payments::{generate_contract_payments, GenerateError};

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

/// Explicit student record; every optional column stays an Option instead of
/// an absent document key.
#[derive(Debug, Clone)]
struct StudentFields {
    name: String,
    email: Option<String>,
    phone: Option<String>,
    class_id: Option<String>,
    status: String,
    modality: String,
    current_book_id: Option<String>,
    contract_start: Option<String>,
    contract_end: Option<String>,
    monthly_value: Option<f64>,
    due_day: Option<i64>,
}

fn parse_student_fields(params: &serde_json::Value) -> Result<StudentFields, HandlerErr> {
    let name = get_required_str(params, "name")?;
    if name.trim().is_empty() {
        return Err(bad_params("name must not be empty"));
    }

    let status = get_optional_str(params, "status").unwrap_or_else(|| "active".to_string());
    if !matches!(status.as_str(), "active" | "inactive" | "paused") {
        return Err(bad_params("status must be active, inactive or paused"));
    }
    let modality = get_optional_str(params, "modality").unwrap_or_else(|| "online".to_string());
    if !matches!(modality.as_str(), "online" | "presencial") {
        return Err(bad_params("modality must be online or presencial"));
    }

    let contract_start = get_optional_str(params, "contractStart");
    let contract_end = get_optional_str(params, "contractEnd");
    for (key, value) in [("contractStart", &contract_start), ("contractEnd", &contract_end)] {
        if let Some(v) = value {
            if chrono::NaiveDate::parse_from_str(v, "%Y-%m-%d").is_err() {
                return Err(bad_params(format!("{} must be an ISO date (YYYY-MM-DD)", key)));
            }
        }
    }

    let monthly_value = match params.get("monthlyValue") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            v.as_f64()
                .ok_or_else(|| bad_params("monthlyValue must be a number"))?,
        ),
    };
    if let Some(v) = monthly_value {
        if v < 0.0 {
            return Err(bad_params("monthlyValue must not be negative"));
        }
    }

    let due_day = match params.get("dueDay") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| bad_params("dueDay must be a number"))?,
        ),
    };
    if let Some(d) = due_day {
        if !(1..=31).contains(&d) {
            return Err(bad_params("dueDay must be between 1 and 31"));
        }
    }

    Ok(StudentFields {
        name: name.trim().to_string(),
        email: get_optional_str(params, "email"),
        phone: get_optional_str(params, "phone"),
        class_id: get_optional_str(params, "classId"),
        status,
        modality,
        current_book_id: get_optional_str(params, "currentBookId"),
        contract_start,
        contract_end,
        monthly_value,
        due_day,
    })
}

fn student_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "email": row.get::<_, Option<String>>(2)?,
        "phone": row.get::<_, Option<String>>(3)?,
        "classId": row.get::<_, Option<String>>(4)?,
        "status": row.get::<_, String>(5)?,
        "modality": row.get::<_, String>(6)?,
        "currentBookId": row.get::<_, Option<String>>(7)?,
        "contractStart": row.get::<_, Option<String>>(8)?,
        "contractEnd": row.get::<_, Option<String>>(9)?,
        "monthlyValue": row.get::<_, Option<f64>>(10)?,
        "dueDay": row.get::<_, Option<i64>>(11)?,
        "createdAt": row.get::<_, String>(12)?,
        "updatedAt": row.get::<_, Option<String>>(13)?,
    }))
}

const STUDENT_COLUMNS: &str = "id, name, email, phone, class_id, status, modality, current_book_id,
     contract_start, contract_end, monthly_value, due_day, created_at, updated_at";

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let status = get_optional_str(params, "status");
    let search = get_optional_str(params, "search").map(|s| s.to_lowercase());

    let sql = format!("SELECT {} FROM students ORDER BY name", STUDENT_COLUMNS);
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map([], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let students: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|s| {
            if let Some(ref want) = status {
                if s.get("status").and_then(|v| v.as_str()) != Some(want.as_str()) {
                    return false;
                }
            }
            if let Some(ref term) = search {
                let name = s.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let email = s.get("email").and_then(|v| v.as_str()).unwrap_or("");
                return name.to_lowercase().contains(term) || email.to_lowercase().contains(term);
            }
            true
        })
        .collect();

    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    let student = conn
        .query_row(&sql, [&student_id], student_json)
        .optional()
        .map_err(db_err)?;
    match student {
        Some(s) => Ok(json!({ "student": s })),
        None => Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        }),
    }
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn run_generation(conn: &Connection, student_id: &str) -> Result<usize, HandlerErr> {
    generate_contract_payments(conn, student_id).map_err(|e| match e {
        GenerateError::NotFound => HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        },
        GenerateError::IncompleteContract(what) => bad_params(format!(
            "cannot generate payments: contract is missing {}",
            what
        )),
        GenerateError::InvalidTerms(msg) => bad_params(msg),
        GenerateError::Insert { message, inserted } => HandlerErr {
            code: "db_insert_failed",
            message,
            // Inserts are per-record with no batch atomicity; report how far
            // we got so the caller can reconcile.
            details: Some(json!({ "table": "payments", "insertedBeforeFailure": inserted })),
        },
        GenerateError::Db(msg) => db_err(msg),
    })
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fields = parse_student_fields(params)?;
    if let Some(ref class_id) = fields.class_id {
        if !class_exists(conn, class_id)? {
            return Err(HandlerErr {
                code: "not_found",
                message: "class not found".to_string(),
                details: None,
            });
        }
    }

    let student_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, name, email, phone, class_id, status, modality, current_book_id,
                              contract_start, contract_end, monthly_value, due_day, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &student_id,
            &fields.name,
            &fields.email,
            &fields.phone,
            &fields.class_id,
            &fields.status,
            &fields.modality,
            &fields.current_book_id,
            &fields.contract_start,
            &fields.contract_end,
            &fields.monthly_value,
            &fields.due_day,
            &created_at,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    let generate = params
        .get("generatePayments")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let generated = if generate {
        run_generation(conn, &student_id)?
    } else {
        0
    };

    Ok(json!({ "studentId": student_id, "generatedPayments": generated }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let fields = parse_student_fields(params)?;
    if let Some(ref class_id) = fields.class_id {
        if !class_exists(conn, class_id)? {
            return Err(HandlerErr {
                code: "not_found",
                message: "class not found".to_string(),
                details: None,
            });
        }
    }

    let updated_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE students SET name = ?, email = ?, phone = ?, class_id = ?, status = ?,
                             modality = ?, current_book_id = ?, contract_start = ?,
                             contract_end = ?, monthly_value = ?, due_day = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            &fields.name,
            &fields.email,
            &fields.phone,
            &fields.class_id,
            &fields.status,
            &fields.modality,
            &fields.current_book_id,
            &fields.contract_start,
            &fields.contract_end,
            &fields.monthly_value,
            &fields.due_day,
            &updated_at,
            &student_id,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    let generate = params
        .get("generatePayments")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let generated = if generate {
        run_generation(conn, &student_id)?
    } else {
        0
    };

    Ok(json!({ "studentId": student_id, "generatedPayments": generated }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    for (sql, table) in [
        ("DELETE FROM payments WHERE student_id = ?", "payments"),
        (
            "DELETE FROM class_sessions WHERE student_id = ?",
            "class_sessions",
        ),
        ("DELETE FROM students WHERE id = ?", "students"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
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
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.get" => Some(with_conn(state, req, students_get)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}

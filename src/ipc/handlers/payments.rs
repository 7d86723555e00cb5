use crate::billing::{self, ContractTerms};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
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

fn parse_iso_date(value: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| bad_params(format!("{} must be an ISO date (YYYY-MM-DD)", key)))
}

pub enum GenerateError {
    NotFound,
    IncompleteContract(&'static str),
    InvalidTerms(String),
    Insert { message: String, inserted: usize },
    Db(String),
}

struct ContractRow {
    student_name: String,
    contract_start: Option<String>,
    contract_end: Option<String>,
    monthly_value: Option<f64>,
    due_day: Option<i64>,
}

/// Expands the student's contract into pending payment rows. Each draft is
/// inserted individually; a failure partway leaves the earlier rows in place
/// (the store offers no batch atomicity) and reports how many landed.
pub fn generate_contract_payments(
    conn: &Connection,
    student_id: &str,
) -> Result<usize, GenerateError> {
    let row: Option<ContractRow> = conn
        .query_row(
            "SELECT name, contract_start, contract_end, monthly_value, due_day
             FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(ContractRow {
                    student_name: r.get(0)?,
                    contract_start: r.get(1)?,
                    contract_end: r.get(2)?,
                    monthly_value: r.get(3)?,
                    due_day: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| GenerateError::Db(e.to_string()))?;
    let Some(row) = row else {
        return Err(GenerateError::NotFound);
    };

    let Some(start_raw) = row.contract_start else {
        return Err(GenerateError::IncompleteContract("contract start date"));
    };
    let Some(end_raw) = row.contract_end else {
        return Err(GenerateError::IncompleteContract("contract end date"));
    };
    let Some(monthly_value) = row.monthly_value else {
        return Err(GenerateError::IncompleteContract("monthly value"));
    };
    let Some(due_day) = row.due_day else {
        return Err(GenerateError::IncompleteContract("due day"));
    };

    let start_date = NaiveDate::parse_from_str(&start_raw, "%Y-%m-%d")
        .map_err(|_| GenerateError::InvalidTerms(format!("stored contract start is not a date: {}", start_raw)))?;
    let end_date = NaiveDate::parse_from_str(&end_raw, "%Y-%m-%d")
        .map_err(|_| GenerateError::InvalidTerms(format!("stored contract end is not a date: {}", end_raw)))?;

    let terms = ContractTerms {
        start_date,
        end_date,
        due_day: due_day.clamp(0, u32::MAX as i64) as u32,
        monthly_amount: monthly_value,
    };
    let drafts =
        billing::payment_schedule(&terms).map_err(|e| GenerateError::InvalidTerms(e.to_string()))?;

    let created_at = chrono::Utc::now().to_rfc3339();
    let mut inserted = 0usize;
    for draft in &drafts {
        let payment_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO payments(id, student_id, student_name, amount, due_date, status,
                                  description, created_at, gateway, payment_method)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'manual', 'manual')",
            rusqlite::params![
                &payment_id,
                student_id,
                &row.student_name,
                draft.amount,
                draft.due_date.format("%Y-%m-%d").to_string(),
                draft.status.as_str(),
                &draft.description,
                &created_at,
            ],
        )
        .map_err(|e| GenerateError::Insert {
            message: e.to_string(),
            inserted,
        })?;
        inserted += 1;
    }

    tracing::info!(student_id, count = inserted, "generated contract payments");
    Ok(inserted)
}

fn payments_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let description = get_required_str(params, "description")?;
    if description.trim().is_empty() {
        return Err(bad_params("description must not be empty"));
    }
    let amount = params
        .get("amount")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| bad_params("missing amount"))?;
    if amount < 0.0 {
        return Err(bad_params("amount must not be negative"));
    }
    let due_date_raw = get_required_str(params, "dueDate")?;
    let due_date = parse_iso_date(&due_date_raw, "dueDate")?;
    let status = get_optional_str(params, "status").unwrap_or_else(|| "pending".to_string());
    if !matches!(status.as_str(), "pending" | "paid") {
        return Err(bad_params("status must be pending or paid"));
    }

    let student_name: Option<String> = conn
        .query_row("SELECT name FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    let Some(student_name) = student_name else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

    let payment_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO payments(id, student_id, student_name, amount, due_date, status,
                              description, created_at, gateway, payment_method)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'manual', 'manual')",
        rusqlite::params![
            &payment_id,
            &student_id,
            &student_name,
            amount,
            due_date.format("%Y-%m-%d").to_string(),
            &status,
            description.trim(),
            &created_at,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "payments" })),
    })?;

    Ok(json!({ "paymentId": payment_id }))
}

struct PaymentRow {
    id: String,
    student_id: String,
    student_name: String,
    amount: f64,
    due_date: String,
    status: String,
    paid_date: Option<String>,
    description: String,
}

fn fetch_payments(conn: &Connection) -> Result<Vec<PaymentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, student_name, amount, due_date, status, paid_date, description
             FROM payments
             ORDER BY due_date DESC, created_at DESC",
        )
        .map_err(db_err)?;
    stmt.query_map([], |r| {
        Ok(PaymentRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            student_name: r.get(2)?,
            amount: r.get(3)?,
            due_date: r.get(4)?,
            status: r.get(5)?,
            paid_date: r.get(6)?,
            description: r.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn is_overdue(row: &PaymentRow, today: NaiveDate) -> bool {
    if row.status != "pending" {
        return false;
    }
    match NaiveDate::parse_from_str(&row.due_date, "%Y-%m-%d") {
        Ok(d) => d < today,
        Err(_) => false,
    }
}

fn payment_json(row: &PaymentRow, today: NaiveDate) -> serde_json::Value {
    let effective = if row.status == "paid" {
        "paid"
    } else if is_overdue(row, today) {
        "overdue"
    } else {
        "pending"
    };
    json!({
        "id": row.id,
        "studentId": row.student_id,
        "studentName": row.student_name,
        "amount": row.amount,
        "dueDate": row.due_date,
        "status": row.status,
        "effectiveStatus": effective,
        "paidDate": row.paid_date,
        "description": row.description,
    })
}

fn month_year_matches(row: &PaymentRow, month: Option<u32>, year: Option<i32>) -> bool {
    let Ok(d) = NaiveDate::parse_from_str(&row.due_date, "%Y-%m-%d") else {
        return false;
    };
    use chrono::Datelike;
    if let Some(m) = month {
        if d.month() != m {
            return false;
        }
    }
    if let Some(y) = year {
        if d.year() != y {
            return false;
        }
    }
    true
}

fn payments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let month = match params.get("month") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => {
            let m = v
                .as_u64()
                .ok_or_else(|| bad_params("month must be a number 1-12"))?;
            if !(1..=12).contains(&m) {
                return Err(bad_params("month must be a number 1-12"));
            }
            Some(m as u32)
        }
    };
    let year = match params.get("year") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| bad_params("year must be a number"))? as i32,
        ),
    };
    let status_filter = get_optional_str(params, "status");
    if let Some(ref s) = status_filter {
        if !matches!(s.as_str(), "paid" | "pending" | "overdue") {
            return Err(bad_params("status must be paid, pending or overdue"));
        }
    }
    let search = get_optional_str(params, "search").map(|s| s.to_lowercase());

    let today = chrono::Local::now().date_naive();
    let rows = fetch_payments(conn)?;
    let payments: Vec<serde_json::Value> = rows
        .iter()
        .filter(|row| month_year_matches(row, month, year))
        .filter(|row| {
            if let Some(ref term) = search {
                if !row.student_name.to_lowercase().contains(term)
                    && !row.description.to_lowercase().contains(term)
                {
                    return false;
                }
            }
            match status_filter.as_deref() {
                Some("paid") => row.status == "paid",
                Some("overdue") => is_overdue(row, today),
                Some("pending") => row.status == "pending" && !is_overdue(row, today),
                _ => true,
            }
        })
        .map(|row| payment_json(row, today))
        .collect();

    Ok(json!({ "payments": payments }))
}

fn payments_mark_paid(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM payments WHERE id = ?",
            [&payment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(status) = status else {
        return Err(HandlerErr {
            code: "not_found",
            message: "payment not found".to_string(),
            details: None,
        });
    };
    if status == "paid" {
        return Err(bad_params("payment is already paid"));
    }

    let paid_date = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE payments SET status = 'paid', paid_date = ? WHERE id = ?",
        (&paid_date, &payment_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "payments" })),
    })?;

    Ok(json!({ "paymentId": payment_id, "status": "paid", "paidDate": paid_date }))
}

fn payments_generate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let generated = generate_contract_payments(conn, &student_id).map_err(|e| match e {
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
            details: Some(json!({ "table": "payments", "insertedBeforeFailure": inserted })),
        },
        GenerateError::Db(msg) => db_err(msg),
    })?;
    Ok(json!({ "generatedPayments": generated }))
}

fn financial_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let month = params
        .get("month")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| bad_params("missing month"))? as u32;
    if !(1..=12).contains(&month) {
        return Err(bad_params("month must be a number 1-12"));
    }
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params("missing year"))? as i32;

    let today = chrono::Local::now().date_naive();
    let rows = fetch_payments(conn)?;

    let mut total_revenue = 0.0;
    let mut pending_count = 0i64;
    let mut pending_value = 0.0;
    let mut overdue_count = 0i64;
    let mut overdue_value = 0.0;
    let mut recent_paid: Vec<serde_json::Value> = Vec::new();

    for row in rows
        .iter()
        .filter(|r| month_year_matches(r, Some(month), Some(year)))
    {
        if row.status == "paid" {
            total_revenue += row.amount;
            if recent_paid.len() < 5 {
                recent_paid.push(payment_json(row, today));
            }
        } else if row.status == "pending" {
            if is_overdue(row, today) {
                overdue_count += 1;
                overdue_value += row.amount;
            } else {
                pending_count += 1;
                pending_value += row.amount;
            }
        }
    }

    Ok(json!({
        "month": month,
        "year": year,
        "totalRevenue": total_revenue,
        "pendingCount": pending_count,
        "pendingValue": pending_value,
        "overdueCount": overdue_count,
        "overdueValue": overdue_value,
        "recentPaid": recent_paid,
    }))
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
        "payments.create" => Some(with_conn(state, req, payments_create)),
        "payments.list" => Some(with_conn(state, req, payments_list)),
        "payments.markPaid" => Some(with_conn(state, req, payments_mark_paid)),
        "payments.generateFromContract" => Some(with_conn(state, req, payments_generate)),
        "financial.summary" => Some(with_conn(state, req, financial_summary)),
        _ => None,
    }
}

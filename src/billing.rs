use chrono::{Datelike, NaiveDate};
use std::fmt;

/// Contract fields that drive monthly charge generation. Values arrive from
/// the student record; callers validate date parsing before building this.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContractTerms {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub due_day: u32,
    pub monthly_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStatus {
    Pending,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Pending => "pending",
        }
    }
}

/// One generated monthly charge, not yet persisted. The store assigns ids
/// at insert time.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDraft {
    pub due_date: NaiveDate,
    pub amount: f64,
    pub status: DraftStatus,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TermsError {
    DueDayOutOfRange(u32),
    NegativeAmount(f64),
}

impl fmt::Display for TermsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermsError::DueDayOutOfRange(d) => {
                write!(f, "due day must be between 1 and 31, got {}", d)
            }
            TermsError::NegativeAmount(v) => {
                write!(f, "monthly amount must not be negative, got {}", v)
            }
        }
    }
}

impl std::error::Error for TermsError {}

const MONTH_NAMES_PT: [&str; 12] = [
    "Janeiro",
    "Fevereiro",
    "Março",
    "Abril",
    "Maio",
    "Junho",
    "Julho",
    "Agosto",
    "Setembro",
    "Outubro",
    "Novembro",
    "Dezembro",
];

fn days_in_month(year: i32, month: u32) -> u32 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => 30,
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// Due date for a given month. A due day past the end of the month clamps to
/// the last day; the clamp is re-derived every month and never carries over.
fn due_date_in(year: i32, month: u32, due_day: u32) -> NaiveDate {
    let day = due_day.min(days_in_month(year, month));
    // day is in range by construction
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| {
        NaiveDate::from_ymd_opt(year, month, 1).expect("valid first of month")
    })
}

pub fn description_for(year: i32, month: u32) -> String {
    let name = MONTH_NAMES_PT[(month as usize - 1).min(11)];
    format!("Mensalidade {}/{}", name, year)
}

/// Expands contract terms into the ordered list of monthly charges.
///
/// The first due date is the occurrence of `due_day` in the start month,
/// rolled one month forward if it would fall before the contract start.
/// Generation stops at the last occurrence not exceeding the contract end.
/// An inverted date range yields an empty schedule rather than an error.
pub fn payment_schedule(terms: &ContractTerms) -> Result<Vec<PaymentDraft>, TermsError> {
    if !(1..=31).contains(&terms.due_day) {
        return Err(TermsError::DueDayOutOfRange(terms.due_day));
    }
    if !(terms.monthly_amount >= 0.0) {
        return Err(TermsError::NegativeAmount(terms.monthly_amount));
    }
    if terms.start_date > terms.end_date {
        return Ok(Vec::new());
    }

    let mut year = terms.start_date.year();
    let mut month = terms.start_date.month();
    let mut candidate = due_date_in(year, month, terms.due_day);
    if candidate < terms.start_date {
        (year, month) = next_month(year, month);
        candidate = due_date_in(year, month, terms.due_day);
    }

    let mut drafts = Vec::new();
    while candidate <= terms.end_date {
        drafts.push(PaymentDraft {
            due_date: candidate,
            amount: terms.monthly_amount,
            status: DraftStatus::Pending,
            description: description_for(year, month),
        });
        (year, month) = next_month(year, month);
        candidate = due_date_in(year, month, terms.due_day);
    }

    Ok(drafts)
}

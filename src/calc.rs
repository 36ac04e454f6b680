use chrono::{DateTime, Datelike, FixedOffset, Utc};
use serde::Serialize;

/// Month-count columns in calendar order. Index 0 is January; the 1-based
/// calendar month is always `index + 1`.
pub const MONTH_COLUMNS: [&str; 12] = [
    "jan_cases",
    "feb_cases",
    "mar_cases",
    "apr_cases",
    "may_cases",
    "jun_cases",
    "jul_cases",
    "aug_cases",
    "sep_cases",
    "oct_cases",
    "nov_cases",
    "dec_cases",
];

pub const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Sk,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "sk" => Some(Role::Sk),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Sk => "sk",
        }
    }
}

/// Bangladesh civil time is UTC+6 year-round (no daylight saving), so a
/// fixed offset is sufficient. All reporting-window decisions use this
/// clock, never the caller's local time.
const DHAKA_UTC_OFFSET_SECS: i32 = 6 * 3600;

pub fn dhaka_now() -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(DHAKA_UTC_OFFSET_SECS).expect("constant offset");
    Utc::now().with_timezone(&offset)
}

pub fn dhaka_year(now: &DateTime<FixedOffset>) -> i64 {
    now.year() as i64
}

pub fn dhaka_month(now: &DateTime<FixedOffset>) -> u32 {
    now.month()
}

/// Whether the given monthly cell may be edited by the actor.
///
/// Admins may backfill or correct any historical cell. A reporter may only
/// write into the currently open window: the record's reporting year must
/// be the current Dhaka year and the cell's month must be the current
/// Dhaka month. Everything else is frozen.
pub fn is_month_editable(
    role: Role,
    record_year: i64,
    current_year: i64,
    current_month: u32,
    month_index: usize,
) -> bool {
    match role {
        Role::Admin => true,
        Role::Sk => record_year == current_year && month_index as u32 + 1 == current_month,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
}

impl ApprovalStatus {
    pub fn parse(s: &str) -> Option<ApprovalStatus> {
        match s {
            "PENDING" => Some(ApprovalStatus::Pending),
            "APPROVED" => Some(ApprovalStatus::Approved),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
        }
    }
}

/// Ledger-driven status shown on the admin review surface. Absence of a
/// ledger entry is its own state, rendered as a dash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellStatus {
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "NOT_SUBMITTED")]
    NotSubmitted,
}

pub fn cell_status(entry: Option<ApprovalStatus>) -> CellStatus {
    match entry {
        Some(ApprovalStatus::Approved) => CellStatus::Approved,
        Some(ApprovalStatus::Pending) => CellStatus::Pending,
        None => CellStatus::NotSubmitted,
    }
}

/// Value/time heuristic shown on the reporter grid. Does not consult the
/// approval ledger; the review surface has its own status model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonthStatus {
    #[serde(rename = "RED")]
    Red,
    #[serde(rename = "YELLOW")]
    Yellow,
    #[serde(rename = "GREEN")]
    Green,
}

pub fn month_status(
    value: i64,
    month_index: usize,
    role: Role,
    record_year: i64,
    current_year: i64,
    current_month: u32,
) -> MonthStatus {
    if value <= 0 {
        return MonthStatus::Red;
    }
    let month_number = month_index as u32 + 1;
    if role == Role::Sk && record_year == current_year && month_number == current_month {
        return MonthStatus::Yellow;
    }
    MonthStatus::Green
}

/// Sum of the twelve monthly counts. Recomputed on every read, never
/// persisted.
pub fn month_total(months: &[i64; 12]) -> i64 {
    months.iter().sum()
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Validates a monthly case count coming off the wire. Null is treated as
/// zero (a cleared cell); anything that is not a non-negative integer is
/// rejected before any write happens, leaving the stored value untouched.
pub fn parse_case_value(raw: &serde_json::Value) -> Result<i64, CalcError> {
    if raw.is_null() {
        return Ok(0);
    }
    let Some(n) = raw.as_i64() else {
        return Err(CalcError::new(
            "bad_params",
            "case count must be a non-negative integer",
        ));
    };
    if n < 0 {
        return Err(CalcError::new(
            "bad_params",
            "case count must be a non-negative integer",
        ));
    }
    Ok(n)
}

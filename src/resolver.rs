use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;

/// A single attendance record as fetched for one employee. `present` is
/// optional because older records may carry neither signal; `holiday` is the
/// redundant per-record flag some marking workflows set.
#[derive(Debug, Clone)]
pub struct AttendanceDay {
    pub date: String,
    pub present: Option<bool>,
    pub holiday: bool,
}

/// An approved leave range, inclusive on both ends. Callers must pre-filter
/// to APPROVED; pending and rejected leaves are invisible to the calendar.
#[derive(Debug, Clone)]
pub struct LeaveSpan {
    pub from_date: String,
    pub to_date: String,
    pub leave_type: String,
}

/// The single display status computed for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayStatus {
    Holiday,
    Present,
    Absent,
    Leave(String),
}

impl DayStatus {
    pub fn label(&self) -> String {
        match self {
            DayStatus::Holiday => "HOLIDAY".to_string(),
            DayStatus::Present => "PRESENT".to_string(),
            DayStatus::Absent => "ABSENT".to_string(),
            DayStatus::Leave(kind) => format!("LEAVE_{}", kind),
        }
    }
}

/// Render-time category. Sunday is a fallback for unresolved days only; it
/// never outranks a resolved status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayCategory {
    Resolved(DayStatus),
    Sunday,
    Blank,
}

impl DayCategory {
    pub fn label(&self) -> String {
        match self {
            DayCategory::Resolved(s) => s.label(),
            DayCategory::Sunday => "SUNDAY".to_string(),
            DayCategory::Blank => "BLANK".to_string(),
        }
    }
}

pub fn is_iso_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Resolve one day against the four pre-fetched sources. Fixed precedence,
/// first match wins:
///
/// 1. active holiday date
/// 2. first attendance record for the date: holiday flag, then present,
///    then absent (a record with neither signal contributes nothing)
/// 3. first approved leave whose inclusive range covers the date
/// 4. no determination
///
/// Range containment compares ISO strings lexicographically, which is valid
/// for fixed-width YYYY-MM-DD. Malformed dates are a caller precondition.
pub fn resolve(
    date: &str,
    holidays: &HashSet<String>,
    attendance: &[AttendanceDay],
    approved_leaves: &[LeaveSpan],
) -> Option<DayStatus> {
    debug_assert!(is_iso_date(date), "resolver requires a valid ISO date");

    if holidays.contains(date) {
        return Some(DayStatus::Holiday);
    }

    if let Some(rec) = attendance.iter().find(|r| r.date == date) {
        if rec.holiday {
            return Some(DayStatus::Holiday);
        }
        if let Some(present) = rec.present {
            return Some(if present {
                DayStatus::Present
            } else {
                DayStatus::Absent
            });
        }
        // No signal on the record; fall through to leave coverage.
    }

    if let Some(leave) = approved_leaves
        .iter()
        .find(|l| l.from_date.as_str() <= date && date <= l.to_date.as_str())
    {
        return Some(DayStatus::Leave(leave.leave_type.clone()));
    }

    None
}

/// Apply the Sunday render fallback after resolution.
pub fn day_category(date: &str, resolved: Option<DayStatus>) -> DayCategory {
    if let Some(status) = resolved {
        return DayCategory::Resolved(status);
    }
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d");
    debug_assert!(parsed.is_ok(), "day_category requires a valid ISO date");
    match parsed {
        Ok(d) if d.weekday() == Weekday::Sun => DayCategory::Sunday,
        _ => DayCategory::Blank,
    }
}

/// Every date of `year`-`month` in order, formatted YYYY-MM-DD.
pub fn month_dates(year: i32, month: u32) -> Vec<String> {
    let mut out = Vec::new();
    let mut day = 1u32;
    while let Some(d) = NaiveDate::from_ymd_opt(year, month, day) {
        out.push(d.format("%Y-%m-%d").to_string());
        day += 1;
    }
    out
}

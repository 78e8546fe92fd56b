//! Per-patient attendance history.
//!
//! Summarises a treatment plan (total / attended / remaining sessions) and
//! indexes the history by date so a month calendar can look up each cell.

use crate::services::date_utils;
use chrono::{Datelike, NaiveDate};
use shared::{AttendanceHistory, AttendanceStatus, HistoryEntry};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Sessions left on a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Sessions(u32),
    /// Open-ended plan; there is no meaningful count to show.
    Unbounded,
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remaining::Sessions(n) => write!(f, "{}", n),
            Remaining::Unbounded => f.write_str("open-ended"),
        }
    }
}

/// Type of calendar cell for explicit rendering logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarDayType {
    PaddingBefore,
    MonthDay,
    PaddingAfter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarCell {
    pub day_type: CalendarDayType,
    /// `None` for padding cells
    pub date: Option<NaiveDate>,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarMonthView {
    pub year: i32,
    pub month: u32,
    pub title: String,
    /// 0 = Sunday
    pub first_day_of_week: u32,
    pub cells: Vec<CalendarCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("Invalid month: {0}. Must be between 1 and 12")]
    InvalidMonth(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    pub total_days: Option<u32>,
    pub present_count: u32,
    pub remaining: Remaining,
    entries: Vec<HistoryEntry>,
    by_date: HashMap<NaiveDate, usize>,
}

impl HistorySummary {
    pub fn from_history(history: AttendanceHistory) -> Self {
        // A plan with zero contracted days is an unset plan, not a finished one
        let total_days = history.stats.total_days.filter(|days| *days > 0);
        let present_count = history.stats.present_count;

        let remaining = match total_days {
            Some(total) => Remaining::Sessions(total.saturating_sub(present_count)),
            None => Remaining::Unbounded,
        };

        if let (Remaining::Sessions(ours), Some(theirs)) = (remaining, history.stats.remaining) {
            if ours != theirs {
                warn!(component = "attendance-history", ours, theirs, "Backend remaining-session count disagrees");
            }
        }

        let mut entries = history.history;
        entries.sort_by_key(|entry| entry.date);

        let mut by_date = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if by_date.insert(entry.date, index).is_some() {
                warn!(component = "attendance-history", date = %entry.date, "Duplicate history entry, keeping the latest");
            }
        }

        Self {
            total_days,
            present_count,
            remaining,
            entries,
            by_date,
        }
    }

    /// Status for a calendar date; dates with no record are `none`.
    pub fn status_on(&self, date: NaiveDate) -> AttendanceStatus {
        self.entry_on(date).map(|e| e.status).unwrap_or_default()
    }

    pub fn entry_on(&self, date: NaiveDate) -> Option<&HistoryEntry> {
        self.by_date.get(&date).map(|index| &self.entries[*index])
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn count(&self, status: AttendanceStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Completion of the plan as a whole percentage. `None` for open-ended
    /// plans, where any percentage would be made up.
    pub fn progress_percent(&self) -> Option<u8> {
        let total = self.total_days?;
        let percent = (u64::from(self.present_count) * 100 / u64::from(total)).min(100);
        Some(percent as u8)
    }

    /// Sunday-first month grid with each day's status.
    pub fn month(&self, year: i32, month: u32) -> Result<CalendarMonthView, CalendarError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(CalendarError::InvalidMonth(month))?;
        let first_day_of_week = first.weekday().num_days_from_sunday();
        let days_in_month = date_utils::days_in_month(year, month);

        let mut cells = Vec::with_capacity(42);
        for _ in 0..first_day_of_week {
            cells.push(CalendarCell {
                day_type: CalendarDayType::PaddingBefore,
                date: None,
                status: AttendanceStatus::None,
                remarks: None,
            });
        }

        for date in first.iter_days().take(days_in_month as usize) {
            let entry = self.entry_on(date);
            cells.push(CalendarCell {
                day_type: CalendarDayType::MonthDay,
                date: Some(date),
                status: entry.map(|e| e.status).unwrap_or_default(),
                remarks: entry.and_then(|e| e.remarks.clone()),
            });
        }

        while cells.len() % 7 != 0 {
            cells.push(CalendarCell {
                day_type: CalendarDayType::PaddingAfter,
                date: None,
                status: AttendanceStatus::None,
                remarks: None,
            });
        }

        Ok(CalendarMonthView {
            year,
            month,
            title: format!("{} {}", date_utils::month_name(month), year),
            first_day_of_week,
            cells,
        })
    }
}

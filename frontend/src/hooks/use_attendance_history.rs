use crate::domain::attendance_history::{CalendarError, CalendarMonthView, HistorySummary};
use crate::error::ApiError;
use crate::services::api::ClinicApi;
use crate::services::date_utils;
use chrono::Datelike;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryViewState {
    pub patient_id: Option<u64>,
    pub summary: Option<HistorySummary>,
    pub year: i32,
    pub month: u32,
    pub loading: bool,
    pub error: Option<String>,
}

/// Per-patient attendance history with a navigable month calendar.
pub struct AttendanceHistoryView {
    api: Arc<dyn ClinicApi>,
    state: Mutex<HistoryViewState>,
}

impl AttendanceHistoryView {
    pub fn new(api: Arc<dyn ClinicApi>) -> Self {
        let today = date_utils::today();
        Self {
            api,
            state: Mutex::new(HistoryViewState {
                patient_id: None,
                summary: None,
                year: today.year(),
                month: today.month(),
                loading: false,
                error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HistoryViewState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> HistoryViewState {
        self.lock().clone()
    }

    /// Load `patient_id`. A failed reload of the same patient keeps the old
    /// summary; switching patients never shows the previous patient's data.
    pub async fn load(&self, patient_id: u64) -> Result<(), ApiError> {
        {
            let mut state = self.lock();
            if state.patient_id != Some(patient_id) {
                state.summary = None;
            }
            state.patient_id = Some(patient_id);
            state.loading = true;
        }

        let result = self.api.attendance_history(patient_id).await;

        let mut state = self.lock();
        if state.patient_id != Some(patient_id) {
            debug!(component = "attendance-history", patient_id, "Discarding history for a patient no longer shown");
            return Ok(());
        }
        state.loading = false;
        match result {
            Ok(history) => {
                state.summary = Some(HistorySummary::from_history(history));
                state.error = None;
                Ok(())
            }
            Err(err) => {
                warn!(component = "attendance-history", patient_id, error = %err, "History fetch failed");
                state.error = Some(err.user_message());
                Err(err)
            }
        }
    }

    pub fn show_month(&self, year: i32, month: u32) -> Result<(), CalendarError> {
        if !(1..=12).contains(&month) {
            return Err(CalendarError::InvalidMonth(month));
        }
        let mut state = self.lock();
        state.year = year;
        state.month = month;
        Ok(())
    }

    pub fn next_month(&self) {
        let mut state = self.lock();
        if state.month == 12 {
            state.month = 1;
            state.year += 1;
        } else {
            state.month += 1;
        }
    }

    pub fn previous_month(&self) {
        let mut state = self.lock();
        if state.month == 1 {
            state.month = 12;
            state.year -= 1;
        } else {
            state.month -= 1;
        }
    }

    /// Calendar for the visible month, once a history is loaded.
    pub fn calendar(&self) -> Option<Result<CalendarMonthView, CalendarError>> {
        let state = self.lock();
        let summary = state.summary.as_ref()?;
        Some(summary.month(state.year, state.month))
    }
}

//! Daily attendance roster and the per-patient marking state machine.
//!
//! Every patient row owns an independent [`MarkingState`]. A row moves
//! `Idle → Evaluating → {ConfirmPending | BalanceActionPending} → Submitting`
//! and back to `Idle` once the backend accepts the mark. A failed submission
//! restores the state the operator submitted from and rolls back the
//! optimistic status patch.
//!
//! The lock around [`AttendanceState`] is never held across an `.await`, so
//! the controller can be shared between tasks behind an `Arc`.

use crate::domain::balance::{self, BalanceOutcome};
use crate::domain::money::{MoneyService, MoneyValidationError};
use crate::error::{ActionError, ApiError};
use crate::services::api::ClinicApi;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use shared::{AttendanceQuery, AttendanceRecord, AttendanceStats, AttendanceStatus, MarkAttendanceRequest, PaymentMode, Session};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Payment sub-form shown from `BalanceActionPending`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaymentForm {
    pub amount: String,
    pub mode: Option<PaymentMode>,
    pub remarks: String,
    pub errors: Vec<MoneyValidationError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Confirm,
    CollectPayment,
    RequestApproval,
}

impl SubmissionKind {
    fn optimistic_status(&self) -> AttendanceStatus {
        match self {
            SubmissionKind::Confirm | SubmissionKind::CollectPayment => AttendanceStatus::Present,
            SubmissionKind::RequestApproval => AttendanceStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkingState {
    Idle,
    Evaluating,
    ConfirmPending,
    BalanceActionPending {
        shortfall: Decimal,
        suggested_payment: Decimal,
        payment_form: Option<PaymentForm>,
    },
    Submitting {
        kind: SubmissionKind,
        restore: Box<MarkingState>,
    },
}

impl MarkingState {
    pub fn name(&self) -> &'static str {
        match self {
            MarkingState::Idle => "idle",
            MarkingState::Evaluating => "evaluating",
            MarkingState::ConfirmPending => "awaiting confirmation",
            MarkingState::BalanceActionPending { .. } => "awaiting a balance decision",
            MarkingState::Submitting { .. } => "submitting",
        }
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self, MarkingState::Submitting { .. })
    }
}

/// One patient row's marking attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkingAttempt {
    pub state: MarkingState,
    pub error: Option<String>,
}

/// Result of a confirmation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The mark was accepted; `refreshed` says whether the roster re-fetch
    /// afterwards also succeeded.
    Submitted { refreshed: bool },
    /// A submission for this row was already in flight; nothing was sent.
    Ignored,
}

/// Filters sent with the roster query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterFilter {
    pub search: Option<String>,
    pub status: Option<AttendanceStatus>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttendanceState {
    pub date: Option<NaiveDate>,
    pub records: Vec<AttendanceRecord>,
    pub stats: AttendanceStats,
    pub filter: RosterFilter,
    pub loading: bool,
    pub error: Option<String>,
    pub attempts: BTreeMap<u64, MarkingAttempt>,
    latest_fetch: u64,
}

impl AttendanceState {
    pub fn record(&self, patient_id: u64) -> Option<&AttendanceRecord> {
        self.records.iter().find(|r| r.patient_id == patient_id)
    }

    fn record_mut(&mut self, patient_id: u64) -> Option<&mut AttendanceRecord> {
        self.records.iter_mut().find(|r| r.patient_id == patient_id)
    }

    pub fn marking_state(&self, patient_id: u64) -> MarkingState {
        self.attempts
            .get(&patient_id)
            .map(|a| a.state.clone())
            .unwrap_or(MarkingState::Idle)
    }
}

pub struct AttendanceController {
    api: Arc<dyn ClinicApi>,
    session: Session,
    money: MoneyService,
    state: Mutex<AttendanceState>,
}

impl AttendanceController {
    pub fn new(api: Arc<dyn ClinicApi>, session: Session, money: MoneyService) -> Self {
        Self {
            api,
            session,
            money,
            state: Mutex::new(AttendanceState::default()),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn lock(&self) -> MutexGuard<'_, AttendanceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of everything a view renders.
    pub fn state(&self) -> AttendanceState {
        self.lock().clone()
    }

    pub fn set_filter(&self, filter: RosterFilter) {
        self.lock().filter = filter;
    }

    /// The "Mark Present" control is enabled only for unmarked rows that are
    /// not already mid-flow.
    pub fn can_mark(&self, patient_id: u64) -> bool {
        let state = self.lock();
        self.session.role.can_mark_attendance()
            && state.record(patient_id).map_or(false, |r| r.status == AttendanceStatus::None)
            && state.marking_state(patient_id) == MarkingState::Idle
    }

    pub fn is_submitting(&self, patient_id: u64) -> bool {
        self.lock().marking_state(patient_id).is_submitting()
    }

    /// The modal's confirm, collect and request buttons are enabled while the
    /// row waits on the operator and nothing is in flight.
    pub fn can_submit(&self, patient_id: u64) -> bool {
        matches!(
            self.lock().marking_state(patient_id),
            MarkingState::ConfirmPending | MarkingState::BalanceActionPending { .. }
        )
    }

    /// Fetch the roster for `date`. On failure the previous roster stays in
    /// place and the error is recorded. A response overtaken by a later
    /// refresh is dropped.
    pub async fn refresh(&self, date: NaiveDate) -> Result<(), ApiError> {
        let (query, ticket) = {
            let mut state = self.lock();
            state.latest_fetch += 1;
            state.loading = true;
            let filter = state.filter.clone();
            let query = AttendanceQuery {
                search: filter.search,
                status: filter.status,
                limit: filter.limit,
                ..AttendanceQuery::for_day(self.session.branch_id, date)
            };
            (query, state.latest_fetch)
        };

        debug!(component = "attendance", branch_id = query.branch_id, %date, "Fetching roster");
        let result = self.api.fetch_attendance(&query).await;

        let mut state = self.lock();
        if state.latest_fetch != ticket {
            debug!(component = "attendance", %date, "Discarding superseded roster response");
            return result.map(|_| ());
        }
        state.loading = false;
        match result {
            Ok(response) => {
                if state.date != Some(date) {
                    // In-flight marks keep their guard across a date switch
                    state.attempts.retain(|_, attempt| attempt.state.is_submitting());
                }
                state.date = Some(date);
                state.records = response.data;
                state.stats = response.stats;
                state.error = None;
                // Rows that are no longer unmarked can't stay mid-flow
                let AttendanceState { records, attempts, .. } = &mut *state;
                attempts.retain(|id, attempt| {
                    attempt.state.is_submitting()
                        || records.iter().any(|r| r.patient_id == *id && r.status == AttendanceStatus::None)
                });
                info!(component = "attendance", %date, count = state.records.len(), "Roster loaded");
                Ok(())
            }
            Err(err) => {
                warn!(component = "attendance", %date, error = %err, "Roster refresh failed, keeping previous data");
                state.error = Some(err.user_message());
                Err(err)
            }
        }
    }

    /// Start marking `patient_id` present and classify the attempt.
    pub fn begin_marking(&self, patient_id: u64) -> Result<BalanceOutcome, ActionError> {
        if !self.session.role.can_mark_attendance() {
            return Err(ActionError::NotPermitted("mark attendance"));
        }

        let mut state = self.lock();
        let record = state
            .record(patient_id)
            .ok_or(ActionError::UnknownPatient(patient_id))?;
        if record.status != AttendanceStatus::None {
            return Err(ActionError::AlreadyMarked {
                patient_id,
                status: record.status,
            });
        }
        let (balance, cost) = (record.effective_balance, record.cost_per_day);

        let current = state.marking_state(patient_id);
        if current != MarkingState::Idle {
            return Err(ActionError::InvalidState { state: current.name() });
        }

        state.attempts.insert(
            patient_id,
            MarkingAttempt {
                state: MarkingState::Evaluating,
                error: None,
            },
        );

        let outcome = balance::evaluate(balance, cost);
        let next = match outcome {
            BalanceOutcome::Sufficient => MarkingState::ConfirmPending,
            BalanceOutcome::Insufficient { shortfall } => MarkingState::BalanceActionPending {
                shortfall,
                suggested_payment: balance::round_up_to_whole_unit(shortfall),
                payment_form: None,
            },
        };
        debug!(component = "attendance", patient_id, %balance, %cost, state = next.name(), "Balance evaluated");

        if let Some(attempt) = state.attempts.get_mut(&patient_id) {
            attempt.state = next;
        }
        Ok(outcome)
    }

    /// Open the "Collect Payment" sub-form, pre-filled with the suggestion.
    pub fn open_payment_form(&self, patient_id: u64) -> Result<(), ActionError> {
        let mut state = self.lock();
        let attempt = state
            .attempts
            .get_mut(&patient_id)
            .ok_or(ActionError::InvalidState { state: MarkingState::Idle.name() })?;
        match &mut attempt.state {
            MarkingState::BalanceActionPending {
                suggested_payment,
                payment_form,
                ..
            } => {
                if payment_form.is_none() {
                    *payment_form = Some(PaymentForm {
                        amount: suggested_payment.to_string(),
                        ..PaymentForm::default()
                    });
                }
                Ok(())
            }
            other => Err(ActionError::InvalidState { state: other.name() }),
        }
    }

    /// Edit the open payment form in place.
    pub fn edit_payment_form<F>(&self, patient_id: u64, edit: F) -> Result<(), ActionError>
    where
        F: FnOnce(&mut PaymentForm),
    {
        let mut state = self.lock();
        match state.attempts.get_mut(&patient_id).map(|a| &mut a.state) {
            Some(MarkingState::BalanceActionPending {
                payment_form: Some(form),
                ..
            }) => {
                edit(form);
                form.errors.clear();
                Ok(())
            }
            Some(other) => Err(ActionError::InvalidState { state: other.name() }),
            None => Err(ActionError::InvalidState { state: MarkingState::Idle.name() }),
        }
    }

    /// Close the modal and drop any form state. Not possible once submitted.
    pub fn cancel(&self, patient_id: u64) -> Result<(), ActionError> {
        let mut state = self.lock();
        match state.attempts.get(&patient_id).map(|a| &a.state) {
            Some(submitting @ MarkingState::Submitting { .. }) => Err(ActionError::InvalidState {
                state: submitting.name(),
            }),
            Some(_) => {
                state.attempts.remove(&patient_id);
                debug!(component = "attendance", patient_id, "Marking cancelled");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Confirm a sufficient-balance mark, with an optional note.
    pub async fn confirm(&self, patient_id: u64, remarks: Option<&str>) -> Result<SubmitOutcome, ActionError> {
        let (request, marked_on) = {
            let mut state = self.lock();
            match state.marking_state(patient_id) {
                MarkingState::Submitting { .. } => return Ok(SubmitOutcome::Ignored),
                MarkingState::ConfirmPending => {}
                other => return Err(ActionError::InvalidState { state: other.name() }),
            }
            let remarks = self.money.validate_remarks(remarks.unwrap_or_default())?;
            let request = self.request(patient_id, Decimal::ZERO, None, remarks, false);
            let marked_on = self.enter_submitting(&mut state, patient_id, SubmissionKind::Confirm)?;
            (request, marked_on)
        };
        self.submit(patient_id, SubmissionKind::Confirm, request, marked_on).await
    }

    /// Validate the payment form and submit payment plus mark.
    pub async fn collect_payment(&self, patient_id: u64) -> Result<SubmitOutcome, ActionError> {
        let (request, marked_on) = {
            let mut state = self.lock();
            let form = match state.attempts.get_mut(&patient_id).map(|a| &mut a.state) {
                Some(MarkingState::Submitting { .. }) => return Ok(SubmitOutcome::Ignored),
                Some(MarkingState::BalanceActionPending {
                    payment_form: Some(form),
                    ..
                }) => form,
                Some(other) => return Err(ActionError::InvalidState { state: other.name() }),
                None => return Err(ActionError::InvalidState { state: MarkingState::Idle.name() }),
            };

            let validation = self.money.validate_payment(&form.amount, form.mode, &form.remarks);
            if let Some(error) = validation.first_error().cloned() {
                debug!(component = "attendance", patient_id, %error, "Payment form rejected");
                form.errors = validation.errors;
                return Err(ActionError::Validation(error));
            }

            let amount = validation.amount.unwrap_or_default();
            let request = self.request(patient_id, amount, validation.mode, validation.remarks, false);
            let marked_on = self.enter_submitting(&mut state, patient_id, SubmissionKind::CollectPayment)?;
            (request, marked_on)
        };
        self.submit(patient_id, SubmissionKind::CollectPayment, request, marked_on).await
    }

    /// Ask an admin to approve the session without payment. The note travels
    /// with the request into the approval queue.
    pub async fn request_approval(
        &self,
        patient_id: u64,
        remarks: Option<&str>,
    ) -> Result<SubmitOutcome, ActionError> {
        let (request, marked_on) = {
            let mut state = self.lock();
            match state.marking_state(patient_id) {
                MarkingState::Submitting { .. } => return Ok(SubmitOutcome::Ignored),
                MarkingState::BalanceActionPending { .. } => {}
                other => return Err(ActionError::InvalidState { state: other.name() }),
            }
            let remarks = self.money.validate_remarks(remarks.unwrap_or_default())?;
            let request = self.request(patient_id, Decimal::ZERO, None, remarks, true);
            let marked_on = self.enter_submitting(&mut state, patient_id, SubmissionKind::RequestApproval)?;
            (request, marked_on)
        };
        self.submit(patient_id, SubmissionKind::RequestApproval, request, marked_on).await
    }

    fn request(
        &self,
        patient_id: u64,
        payment_amount: Decimal,
        mode: Option<PaymentMode>,
        remarks: Option<String>,
        mark_as_pending: bool,
    ) -> MarkAttendanceRequest {
        MarkAttendanceRequest {
            patient_id,
            employee_id: self.session.employee_id,
            payment_amount,
            mode,
            remarks,
            mark_as_pending,
        }
    }

    /// Move the row to `Submitting` and patch its status optimistically.
    /// Returns the roster date the patch was applied to.
    fn enter_submitting(
        &self,
        state: &mut AttendanceState,
        patient_id: u64,
        kind: SubmissionKind,
    ) -> Result<Option<NaiveDate>, ActionError> {
        let attempt = state
            .attempts
            .get_mut(&patient_id)
            .ok_or(ActionError::InvalidState { state: MarkingState::Idle.name() })?;
        let restore = std::mem::replace(&mut attempt.state, MarkingState::Idle);
        attempt.state = MarkingState::Submitting {
            kind,
            restore: Box::new(restore),
        };
        attempt.error = None;

        if let Some(record) = state.record_mut(patient_id) {
            record.status = kind.optimistic_status();
        }
        Ok(state.date)
    }

    async fn submit(
        &self,
        patient_id: u64,
        kind: SubmissionKind,
        request: MarkAttendanceRequest,
        marked_on: Option<NaiveDate>,
    ) -> Result<SubmitOutcome, ActionError> {
        info!(
            component = "attendance",
            patient_id,
            ?kind,
            payment = %request.payment_amount,
            pending = request.mark_as_pending,
            "Submitting attendance"
        );

        match self.api.mark_attendance(&request).await {
            Ok(_) => {
                let date = {
                    let mut state = self.lock();
                    state.attempts.remove(&patient_id);
                    state.date
                };
                let refreshed = match date {
                    Some(date) => self.refresh(date).await.is_ok(),
                    None => false,
                };
                info!(component = "attendance", patient_id, refreshed, "Attendance marked");
                Ok(SubmitOutcome::Submitted { refreshed })
            }
            Err(err) => {
                warn!(component = "attendance", patient_id, error = %err, "Attendance submission failed, rolling back");
                let mut state = self.lock();
                if state.date == marked_on {
                    if let Some(record) = state.record_mut(patient_id) {
                        record.status = AttendanceStatus::None;
                    }
                }
                if let Some(attempt) = state.attempts.get_mut(&patient_id) {
                    if let MarkingState::Submitting { restore, .. } =
                        std::mem::replace(&mut attempt.state, MarkingState::Idle)
                    {
                        attempt.state = *restore;
                    }
                    attempt.error = Some(err.user_message());
                }
                Err(ActionError::Api(err))
            }
        }
    }
}

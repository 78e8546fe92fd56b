//! In-memory stand-in for the clinic backend, used by the hook tests.
//!
//! It keeps per-patient accounts and an append-only ledger, applies the same
//! settlement rules the real server does, and lets a test inject failures or
//! hold a call in flight.

use crate::domain::ledger::{LedgerAggregator, LedgerEntry};
use crate::error::ApiError;
use crate::services::api::ClinicApi;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use shared::{
    ApiAck, ApprovalDecision, ApprovalQueueQuery, AttendanceHistory, AttendanceListResponse, AttendanceQuery,
    AttendanceRecord, AttendanceStats, AttendanceStatus, EntrySource, EntryType, HistoryEntry, HistoryStats,
    InstrumentAmounts, LedgerQuery, LedgerResponse, LedgerTransaction, MarkAttendanceRequest, PaymentMode,
    PendingApproval, ResponseStatus, UpdateApprovalRequest,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub fn money(v: &str) -> Decimal {
    v.parse().unwrap()
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    FetchAttendance,
    Mark,
    History,
    Ledger,
    PendingApprovals,
    UpdateApproval,
}

#[derive(Debug, Clone)]
pub struct FakePatient {
    pub id: u64,
    pub name: String,
    pub cost_per_day: Decimal,
    pub balance: Decimal,
    pub treatment_days: Option<u32>,
    pub sessions_attended: u32,
    days: BTreeMap<NaiveDate, (AttendanceStatus, Option<String>)>,
}

impl FakePatient {
    pub fn new(id: u64, name: &str, cost_per_day: &str, balance: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            cost_per_day: money(cost_per_day),
            balance: money(balance),
            treatment_days: Some(10),
            sessions_attended: 0,
            days: BTreeMap::new(),
        }
    }

    pub fn treatment_days(mut self, days: Option<u32>) -> Self {
        self.treatment_days = days;
        self
    }
}

#[derive(Debug, Clone)]
struct PendingRequest {
    attendance_id: u64,
    patient_id: u64,
    date: NaiveDate,
    remarks: Option<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    patients: BTreeMap<u64, FakePatient>,
    pending: Vec<PendingRequest>,
    entries: Vec<LedgerEntry>,
    opening: InstrumentAmounts,
    next_attendance_id: u64,
    failures: HashMap<FakeOp, VecDeque<ApiError>>,
    calls: HashMap<FakeOp, usize>,
    last_mark: Option<MarkAttendanceRequest>,
}

pub struct FakeClinicApi {
    today: Mutex<NaiveDate>,
    state: Mutex<FakeState>,
    gates: Mutex<HashMap<FakeOp, Arc<Semaphore>>>,
}

impl FakeClinicApi {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
            state: Mutex::new(FakeState {
                next_attendance_id: 1000,
                ..FakeState::default()
            }),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_patient(self, patient: FakePatient) -> Self {
        self.state.lock().unwrap().patients.insert(patient.id, patient);
        self
    }

    pub fn with_opening(self, opening: InstrumentAmounts) -> Self {
        self.state.lock().unwrap().opening = opening;
        self
    }

    pub fn with_expense(self, on: NaiveDate, amount: &str, mode: PaymentMode, description: &str) -> Self {
        self.state.lock().unwrap().entries.push(LedgerEntry {
            date: on,
            transaction: LedgerTransaction {
                description: description.to_string(),
                entry_type: EntryType::Debit,
                source: EntrySource::Expense,
                amount: money(amount),
                mode: Some(mode),
                patient_id: None,
            },
        });
        self
    }

    /// Seed a pending request as if reception had asked for approval on `on`.
    pub fn with_pending_request(self, patient_id: u64, on: NaiveDate) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let attendance_id = state.next_attendance_id;
            state.next_attendance_id += 1;
            if let Some(patient) = state.patients.get_mut(&patient_id) {
                patient.days.insert(on, (AttendanceStatus::Pending, None));
            }
            state.pending.push(PendingRequest {
                attendance_id,
                patient_id,
                date: on,
                remarks: None,
            });
        }
        self
    }

    pub fn set_today(&self, today: NaiveDate) {
        *self.today.lock().unwrap() = today;
    }

    pub fn fail_next(&self, op: FakeOp, error: ApiError) {
        self.state.lock().unwrap().failures.entry(op).or_default().push_back(error);
    }

    pub fn calls(&self, op: FakeOp) -> usize {
        self.state.lock().unwrap().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn last_mark(&self) -> Option<MarkAttendanceRequest> {
        self.state.lock().unwrap().last_mark.clone()
    }

    pub fn balance_of(&self, patient_id: u64) -> Decimal {
        self.state.lock().unwrap().patients[&patient_id].balance
    }

    pub fn status_of(&self, patient_id: u64, on: NaiveDate) -> AttendanceStatus {
        self.state.lock().unwrap().patients[&patient_id]
            .days
            .get(&on)
            .map(|(status, _)| *status)
            .unwrap_or_default()
    }

    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().unwrap().entries.clone()
    }

    /// Resolve a pending request behind the client's back.
    pub fn drop_pending(&self, attendance_id: u64) {
        self.state.lock().unwrap().pending.retain(|p| p.attendance_id != attendance_id);
    }

    /// Make the next `op` call wait until the returned semaphore gets a
    /// permit. Later calls go straight through.
    pub fn hold_next(&self, op: FakeOp) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates.lock().unwrap().insert(op, gate.clone());
        gate
    }

    async fn wait_if_held(&self, op: FakeOp) -> Result<(), ApiError> {
        let gate = self.gates.lock().unwrap().remove(&op);
        if let Some(gate) = gate {
            let permit = gate.acquire().await.map_err(|e| ApiError::Transport(e.to_string()))?;
            permit.forget();
        }
        Ok(())
    }

    fn enter(&self, op: FakeOp) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(op).or_default() += 1;
        match state.failures.get_mut(&op).and_then(|queue| queue.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap()
    }
}

fn session_charge(patient: &FakePatient, on: NaiveDate) -> LedgerEntry {
    LedgerEntry {
        date: on,
        transaction: LedgerTransaction {
            description: format!("Session: {}", patient.name),
            entry_type: EntryType::Debit,
            source: EntrySource::SessionCharge,
            amount: patient.cost_per_day,
            mode: None,
            patient_id: Some(patient.id),
        },
    }
}

fn record_for(patient: &FakePatient, on: NaiveDate) -> AttendanceRecord {
    let (status, remarks) = patient.days.get(&on).cloned().unwrap_or_default();
    AttendanceRecord {
        patient_id: patient.id,
        patient_name: patient.name.clone(),
        phone: None,
        treatment_type: Some("Physiotherapy".to_string()),
        treatment_days: patient.treatment_days,
        sessions_attended: patient.sessions_attended,
        cost_per_day: patient.cost_per_day,
        effective_balance: patient.balance,
        status,
        remarks,
        attended_date: (status != AttendanceStatus::None).then_some(on),
    }
}

#[async_trait]
impl ClinicApi for FakeClinicApi {
    async fn fetch_attendance(&self, query: &AttendanceQuery) -> Result<AttendanceListResponse, ApiError> {
        self.enter(FakeOp::FetchAttendance)?;
        self.wait_if_held(FakeOp::FetchAttendance).await?;
        let state = self.state.lock().unwrap();

        let all: Vec<AttendanceRecord> = state.patients.values().map(|p| record_for(p, query.date)).collect();
        let count = |status: AttendanceStatus| all.iter().filter(|r| r.status == status).count() as u32;
        let stats = AttendanceStats {
            total_active: all.len() as u32,
            present: count(AttendanceStatus::Present),
            pending: count(AttendanceStatus::Pending),
            absent: count(AttendanceStatus::None),
        };

        let search = query.search.as_deref().map(str::to_lowercase);
        let data = all
            .into_iter()
            .filter(|r| match &search {
                Some(needle) => r.patient_name.to_lowercase().contains(needle),
                None => true,
            })
            .filter(|r| query.status.map_or(true, |status| r.status == status))
            .take(query.limit.unwrap_or(u32::MAX) as usize)
            .collect();

        Ok(AttendanceListResponse {
            status: ResponseStatus::Success,
            message: None,
            data,
            stats,
        })
    }

    async fn mark_attendance(&self, request: &MarkAttendanceRequest) -> Result<ApiAck, ApiError> {
        self.enter(FakeOp::Mark)?;
        self.wait_if_held(FakeOp::Mark).await?;

        let today = self.today();
        let mut state = self.state.lock().unwrap();
        state.last_mark = Some(request.clone());

        let patient = state
            .patients
            .get(&request.patient_id)
            .cloned()
            .ok_or_else(|| ApiError::backend("Patient not found"))?;
        if patient.days.get(&today).map_or(false, |(s, _)| *s != AttendanceStatus::None) {
            return Err(ApiError::backend("Attendance already marked for today"));
        }

        let mut patient = patient;
        if request.carries_payment() {
            patient.balance += request.payment_amount;
            state.entries.push(LedgerEntry {
                date: today,
                transaction: LedgerTransaction {
                    description: format!("Payment: {}", patient.name),
                    entry_type: EntryType::Credit,
                    source: EntrySource::Payment,
                    amount: request.payment_amount,
                    mode: request.mode,
                    patient_id: Some(patient.id),
                },
            });
        }

        if request.mark_as_pending {
            patient.days.insert(today, (AttendanceStatus::Pending, request.remarks.clone()));
            let attendance_id = state.next_attendance_id;
            state.next_attendance_id += 1;
            state.pending.push(PendingRequest {
                attendance_id,
                patient_id: patient.id,
                date: today,
                remarks: request.remarks.clone(),
            });
        } else {
            if patient.balance < patient.cost_per_day {
                return Err(ApiError::backend("Insufficient balance"));
            }
            patient.balance -= patient.cost_per_day;
            patient.sessions_attended += 1;
            patient.days.insert(today, (AttendanceStatus::Present, request.remarks.clone()));
            let charge = session_charge(&patient, today);
            state.entries.push(charge);
        }

        state.patients.insert(patient.id, patient);
        Ok(ApiAck::success("Attendance marked"))
    }

    async fn attendance_history(&self, patient_id: u64) -> Result<AttendanceHistory, ApiError> {
        self.enter(FakeOp::History)?;
        let state = self.state.lock().unwrap();
        let patient = state
            .patients
            .get(&patient_id)
            .ok_or_else(|| ApiError::backend("Patient not found"))?;

        let present_count = patient
            .days
            .values()
            .filter(|(status, _)| *status == AttendanceStatus::Present)
            .count() as u32;
        let history = patient
            .days
            .iter()
            .rev()
            .map(|(date, (status, remarks))| HistoryEntry {
                date: *date,
                status: *status,
                remarks: remarks.clone(),
            })
            .collect();

        Ok(AttendanceHistory {
            stats: HistoryStats {
                total_days: patient.treatment_days,
                present_count,
                remaining: patient.treatment_days.map(|total| total.saturating_sub(present_count)),
            },
            history,
        })
    }

    async fn ledger(&self, query: &LedgerQuery) -> Result<LedgerResponse, ApiError> {
        self.enter(FakeOp::Ledger)?;
        self.wait_if_held(FakeOp::Ledger).await?;
        let state = self.state.lock().unwrap();
        let report = LedgerAggregator::aggregate(state.opening, &state.entries, query.start_date, query.end_date)
            .map_err(|e| ApiError::backend(e.to_string()))?;
        Ok(LedgerResponse {
            status: ResponseStatus::Success,
            message: None,
            summary: Some(report.summary),
            ledger: report.days,
        })
    }

    async fn pending_approvals(&self, query: &ApprovalQueueQuery) -> Result<Vec<PendingApproval>, ApiError> {
        self.enter(FakeOp::PendingApprovals)?;
        let state = self.state.lock().unwrap();
        let search = query.search.as_deref().map(str::to_lowercase);
        Ok(state
            .pending
            .iter()
            .filter_map(|request| {
                let patient = state.patients.get(&request.patient_id)?;
                Some(PendingApproval {
                    attendance_id: request.attendance_id,
                    patient_id: patient.id,
                    patient_name: patient.name.clone(),
                    attendance_date: request.date,
                    status: AttendanceStatus::Pending,
                    cost_per_day: Some(patient.cost_per_day),
                    remarks: request.remarks.clone(),
                })
            })
            .filter(|item| match &search {
                Some(needle) => item.patient_name.to_lowercase().contains(needle),
                None => true,
            })
            .collect())
    }

    async fn update_approval(&self, request: &UpdateApprovalRequest) -> Result<ApiAck, ApiError> {
        self.enter(FakeOp::UpdateApproval)?;
        let mut state = self.state.lock().unwrap();
        let index = state
            .pending
            .iter()
            .position(|p| p.attendance_id == request.attendance_id)
            .ok_or_else(|| ApiError::backend("Attendance request not found"))?;
        let pending = state.pending.remove(index);

        let mut patient = state
            .patients
            .get(&pending.patient_id)
            .cloned()
            .ok_or_else(|| ApiError::backend("Patient not found"))?;
        let remarks = request.remarks.clone().or(pending.remarks);
        patient.days.insert(pending.date, (request.status.resulting_status(), remarks));

        if request.status == ApprovalDecision::Approved {
            patient.balance -= patient.cost_per_day;
            patient.sessions_attended += 1;
            let charge = session_charge(&patient, pending.date);
            state.entries.push(charge);
        }

        state.patients.insert(patient.id, patient);
        Ok(ApiAck::success(format!("Attendance {}", request.status)))
    }
}

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Who is operating the client. Passed explicitly into every core operation
/// instead of being read from an ambient "current user" store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub employee_id: u64,
    pub branch_id: u64,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reception,
    Admin,
    Developer,
}

impl Role {
    pub fn can_mark_attendance(&self) -> bool {
        matches!(self, Role::Reception | Role::Admin)
    }

    pub fn can_resolve_approvals(&self) -> bool {
        matches!(self, Role::Admin | Role::Developer)
    }
}

impl FromStr for Role {
    type Err = UnknownVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reception" => Ok(Role::Reception),
            "admin" => Ok(Role::Admin),
            "developer" => Ok(Role::Developer),
            other => Err(UnknownVariantError::new("role", other)),
        }
    }
}

/// Uniform `status` field of every backend response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    /// Anything else the backend sends is treated as a failure.
    #[serde(other)]
    Unknown,
}

/// Implemented by every response body so the client can check the envelope
/// without knowing the payload.
pub trait Envelope {
    fn status(&self) -> ResponseStatus;
    fn message(&self) -> Option<&str>;

    fn is_success(&self) -> bool {
        self.status() == ResponseStatus::Success
    }
}

/// Bare `{status, message?}` acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiAck {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiAck {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
        }
    }
}

impl Envelope for ApiAck {
    fn status(&self) -> ResponseStatus {
        self.status
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Attendance state of one patient on one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    None,
    Present,
    Pending,
    Rejected,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::None => "none",
            AttendanceStatus::Present => "present",
            AttendanceStatus::Pending => "pending",
            AttendanceStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = UnknownVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(AttendanceStatus::None),
            "present" => Ok(AttendanceStatus::Present),
            "pending" => Ok(AttendanceStatus::Pending),
            "rejected" => Ok(AttendanceStatus::Rejected),
            other => Err(UnknownVariantError::new("attendance status", other)),
        }
    }
}

/// The backend sends `null` for patients that have not been marked yet.
fn status_or_none<'de, D>(deserializer: D) -> Result<AttendanceStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<AttendanceStatus>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    Cash,
    Upi,
    Card,
    Other,
}

impl PaymentMode {
    /// Cash stays in the drawer, every other mode lands in the bank.
    pub fn instrument(&self) -> Instrument {
        match self {
            PaymentMode::Cash => Instrument::Cash,
            PaymentMode::Upi | PaymentMode::Card | PaymentMode::Other => Instrument::Online,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Upi => "upi",
            PaymentMode::Card => "card",
            PaymentMode::Other => "other",
        }
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMode {
    type Err = UnknownVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(PaymentMode::Cash),
            "upi" => Ok(PaymentMode::Upi),
            "card" => Ok(PaymentMode::Card),
            "other" => Ok(PaymentMode::Other),
            other => Err(UnknownVariantError::new("payment mode", other)),
        }
    }
}

/// Payment channel a ledger column tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Cash,
    Online,
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::Cash => f.write_str("cash"),
            Instrument::Online => f.write_str("online"),
        }
    }
}

// ---------------------------------------------------------------------------
// Attendance roster
// ---------------------------------------------------------------------------

/// One row of the daily attendance roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub patient_id: u64,
    pub patient_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment_type: Option<String>,
    /// Contracted sessions; `None` for open-ended plans
    #[serde(default)]
    pub treatment_days: Option<u32>,
    #[serde(default)]
    pub sessions_attended: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost_per_day: Decimal,
    /// Prepaid credit minus consumed and pending liabilities; may be negative
    #[serde(with = "rust_decimal::serde::float")]
    pub effective_balance: Decimal,
    #[serde(default, deserialize_with = "status_or_none")]
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attended_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceStats {
    #[serde(default)]
    pub total_active: u32,
    #[serde(default)]
    pub present: u32,
    #[serde(default)]
    pub pending: u32,
    #[serde(default)]
    pub absent: u32,
}

/// Query string of `GET attendance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceQuery {
    pub branch_id: u64,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl AttendanceQuery {
    pub fn for_day(branch_id: u64, date: NaiveDate) -> Self {
        Self {
            branch_id,
            date,
            search: None,
            status: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceListResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Vec<AttendanceRecord>,
    #[serde(default)]
    pub stats: AttendanceStats,
}

impl Envelope for AttendanceListResponse {
    fn status(&self) -> ResponseStatus {
        self.status
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Body of `POST mark_attendance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkAttendanceRequest {
    pub patient_id: u64,
    pub employee_id: u64,
    /// Zero when no payment is collected with the mark
    #[serde(with = "rust_decimal::serde::float")]
    pub payment_amount: Decimal,
    pub mode: Option<PaymentMode>,
    pub remarks: Option<String>,
    pub mark_as_pending: bool,
}

impl MarkAttendanceRequest {
    pub fn carries_payment(&self) -> bool {
        self.payment_amount > Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Attendance history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// `None` for open-ended plans
    #[serde(default)]
    pub total_days: Option<u32>,
    #[serde(default)]
    pub present_count: u32,
    #[serde(default)]
    pub remaining: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: NaiveDate,
    #[serde(default, deserialize_with = "status_or_none")]
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceHistory {
    pub stats: HistoryStats,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceHistoryResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<AttendanceHistory>,
}

impl Envelope for AttendanceHistoryResponse {
    fn status(&self) -> ResponseStatus {
        self.status
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// A `{total, cash, online}` triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentAmounts {
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub cash: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub online: Decimal,
}

impl InstrumentAmounts {
    pub const ZERO: InstrumentAmounts = InstrumentAmounts {
        total: Decimal::ZERO,
        cash: Decimal::ZERO,
        online: Decimal::ZERO,
    };

    pub fn new(total: Decimal, cash: Decimal, online: Decimal) -> Self {
        Self { total, cash, online }
    }

    /// An amount that moved through `instrument`, or through no payment
    /// channel at all (session charges against prepaid credit).
    pub fn single(amount: Decimal, instrument: Option<Instrument>) -> Self {
        match instrument {
            Some(Instrument::Cash) => Self::new(amount, amount, Decimal::ZERO),
            Some(Instrument::Online) => Self::new(amount, Decimal::ZERO, amount),
            None => Self::new(amount, Decimal::ZERO, Decimal::ZERO),
        }
    }

    pub fn get(&self, column: LedgerColumn) -> Decimal {
        match column {
            LedgerColumn::Cash => self.cash,
            LedgerColumn::Online => self.online,
            LedgerColumn::Total => self.total,
        }
    }
}

impl Add for InstrumentAmounts {
    type Output = InstrumentAmounts;

    fn add(self, rhs: Self) -> Self::Output {
        InstrumentAmounts {
            total: self.total + rhs.total,
            cash: self.cash + rhs.cash,
            online: self.online + rhs.online,
        }
    }
}

impl Sub for InstrumentAmounts {
    type Output = InstrumentAmounts;

    fn sub(self, rhs: Self) -> Self::Output {
        InstrumentAmounts {
            total: self.total - rhs.total,
            cash: self.cash - rhs.cash,
            online: self.online - rhs.online,
        }
    }
}

/// Column of the per-day balance sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerColumn {
    Cash,
    Online,
    Total,
}

impl LedgerColumn {
    pub const ALL: [LedgerColumn; 3] = [LedgerColumn::Cash, LedgerColumn::Online, LedgerColumn::Total];
}

impl fmt::Display for LedgerColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerColumn::Cash => f.write_str("cash"),
            LedgerColumn::Online => f.write_str("online"),
            LedgerColumn::Total => f.write_str("total"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Credit,
    Debit,
}

/// What produced a ledger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Payment,
    Expense,
    SessionCharge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub description: String,
    pub entry_type: EntryType,
    pub source: EntrySource,
    /// Always non-negative; the sign comes from `entry_type`
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default)]
    pub mode: Option<PaymentMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<u64>,
}

impl LedgerTransaction {
    pub fn instrument(&self) -> Option<Instrument> {
        self.mode.map(|mode| mode.instrument())
    }

    /// Credit positive, debit negative.
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Credit => self.amount,
            EntryType::Debit => -self.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDay {
    pub date: NaiveDate,
    pub opening_balance: InstrumentAmounts,
    pub credits: InstrumentAmounts,
    pub debits: InstrumentAmounts,
    pub closing_balance: InstrumentAmounts,
    #[serde(default)]
    pub transactions: Vec<LedgerTransaction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    #[serde(with = "rust_decimal::serde::float")]
    pub total_income: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_expenses: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net_profit_loss: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub opening_balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_balance: Decimal,
}

/// Query string of `GET ledger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub branch_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub summary: Option<LedgerSummary>,
    #[serde(default)]
    pub ledger: Vec<LedgerDay>,
}

impl Envelope for LedgerResponse {
    fn status(&self) -> ResponseStatus {
        self.status
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Approval queue (branch admin)
// ---------------------------------------------------------------------------

/// A pending attendance request awaiting an admin decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub attendance_id: u64,
    pub patient_id: u64,
    pub patient_name: String,
    /// Date the session was taken, which is also the date any debit lands on
    pub attendance_date: NaiveDate,
    #[serde(default, deserialize_with = "status_or_none")]
    pub status: AttendanceStatus,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub cost_per_day: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalQueueResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Vec<PendingApproval>,
}

impl Envelope for ApprovalQueueResponse {
    fn status(&self) -> ResponseStatus {
        self.status
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

pub const FETCH_ATTENDANCE_ACTION: &str = "fetch_attendance";
pub const UPDATE_STATUS_ACTION: &str = "update_status";

/// Query string of `GET admin/attendance.php`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalQueueQuery {
    pub action: String,
    pub branch_id: u64,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl ApprovalQueueQuery {
    pub fn pending(branch_id: u64, search: Option<String>) -> Self {
        Self {
            action: FETCH_ATTENDANCE_ACTION.to_string(),
            branch_id,
            status: AttendanceStatus::Pending,
            search,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn resulting_status(&self) -> AttendanceStatus {
        match self {
            ApprovalDecision::Approved => AttendanceStatus::Present,
            ApprovalDecision::Rejected => AttendanceStatus::Rejected,
        }
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalDecision::Approved => f.write_str("approved"),
            ApprovalDecision::Rejected => f.write_str("rejected"),
        }
    }
}

/// Body of `POST admin/attendance.php`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateApprovalRequest {
    pub action: String,
    pub attendance_id: u64,
    pub status: ApprovalDecision,
    pub employee_id: u64,
    pub remarks: Option<String>,
}

impl UpdateApprovalRequest {
    pub fn new(
        attendance_id: u64,
        status: ApprovalDecision,
        employee_id: u64,
        remarks: Option<String>,
    ) -> Self {
        Self {
            action: UPDATE_STATUS_ACTION.to_string(),
            attendance_id,
            status,
            employee_id,
            remarks,
        }
    }
}

/// Returned when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariantError {
    kind: &'static str,
    value: String,
}

impl UnknownVariantError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UnknownVariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariantError {}

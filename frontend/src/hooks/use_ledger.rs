use crate::domain::ledger::{
    balance_sheet, signed_transactions, summarize, BalanceSheetRow, LedgerAggregator, LedgerDiscrepancy, LedgerError,
    SignedTransaction,
};
use crate::domain::money::MoneyService;
use crate::error::ApiError;
use crate::services::api::ClinicApi;
use crate::services::date_utils;
use chrono::NaiveDate;
use shared::{LedgerDay, LedgerQuery, LedgerSummary, Session};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerBoardError {
    #[error(transparent)]
    Range(#[from] LedgerError),

    #[error("Invalid month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },

    #[error("Nothing to retry: no ledger range has been requested yet")]
    NothingToRetry,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LedgerBoardState {
    pub range: Option<LedgerQuery>,
    pub summary: Option<LedgerSummary>,
    pub days: Vec<LedgerDay>,
    pub expanded: BTreeSet<NaiveDate>,
    pub discrepancies: Vec<LedgerDiscrepancy>,
    pub loading: bool,
    pub error: Option<String>,
    latest_fetch: u64,
}

impl LedgerBoardState {
    /// True when the last fetch failed and a retry should be offered.
    pub fn can_retry(&self) -> bool {
        self.error.is_some() && self.range.is_some()
    }

    pub fn day(&self, date: NaiveDate) -> Option<&LedgerDay> {
        self.days.iter().find(|d| d.date == date)
    }
}

/// Headline cards, formatted with no decimals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerKpis {
    pub total_income: String,
    pub total_expenses: String,
    pub net_profit_loss: String,
    pub opening_balance: String,
    pub current_balance: String,
}

/// Expanded accordion content for one day.
#[derive(Debug, Clone, PartialEq)]
pub struct DayDetail {
    pub date: NaiveDate,
    pub sheet: [BalanceSheetRow; 3],
    pub transactions: Vec<SignedTransaction>,
}

/// Branch ledger for a date range with an expand/collapse accordion per day.
///
/// Expanding a day never re-fetches: the detail is derived from the day
/// already loaded.
pub struct LedgerBoard {
    api: Arc<dyn ClinicApi>,
    session: Session,
    money: MoneyService,
    state: Mutex<LedgerBoardState>,
}

impl LedgerBoard {
    pub fn new(api: Arc<dyn ClinicApi>, session: Session, money: MoneyService) -> Self {
        Self {
            api,
            session,
            money,
            state: Mutex::new(LedgerBoardState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerBoardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> LedgerBoardState {
        self.lock().clone()
    }

    /// Fetch `[start, end]`. A failure keeps whatever was shown before, and a
    /// response overtaken by a later load is dropped.
    pub async fn load(&self, start: NaiveDate, end: NaiveDate) -> Result<(), LedgerBoardError> {
        if start > end {
            return Err(LedgerError::InvalidRange { start, end }.into());
        }

        let query = LedgerQuery {
            branch_id: self.session.branch_id,
            start_date: start,
            end_date: end,
        };
        let ticket = {
            let mut state = self.lock();
            state.latest_fetch += 1;
            state.range = Some(query);
            state.loading = true;
            state.latest_fetch
        };

        debug!(component = "ledger", branch_id = query.branch_id, %start, %end, "Fetching ledger");
        let result = self.api.ledger(&query).await;

        let mut state = self.lock();
        if state.latest_fetch != ticket {
            debug!(component = "ledger", %start, %end, "Discarding superseded ledger response");
            return result.map(|_| ()).map_err(LedgerBoardError::from);
        }
        state.loading = false;
        match result {
            Ok(response) => {
                let discrepancies = LedgerAggregator::reconcile(&response.ledger);
                for discrepancy in &discrepancies {
                    warn!(component = "ledger", %discrepancy, "Ledger does not reconcile");
                }

                state.summary = Some(response.summary.unwrap_or_else(|| summarize(&response.ledger)));
                let dates: BTreeSet<NaiveDate> = response.ledger.iter().map(|d| d.date).collect();
                state.expanded.retain(|date| dates.contains(date));
                state.days = response.ledger;
                state.discrepancies = discrepancies;
                state.error = None;
                info!(component = "ledger", days = state.days.len(), "Ledger loaded");
                Ok(())
            }
            Err(err) => {
                warn!(component = "ledger", error = %err, "Ledger fetch failed, keeping previous data");
                state.error = Some(err.user_message());
                Err(err.into())
            }
        }
    }

    /// Load a whole calendar month.
    pub async fn load_month(&self, year: i32, month: u32) -> Result<(), LedgerBoardError> {
        let (start, end) =
            date_utils::month_bounds(year, month).ok_or(LedgerBoardError::InvalidMonth { year, month })?;
        self.load(start, end).await
    }

    /// Re-run the last requested range.
    pub async fn retry(&self) -> Result<(), LedgerBoardError> {
        let range = self.lock().range.ok_or(LedgerBoardError::NothingToRetry)?;
        self.load(range.start_date, range.end_date).await
    }

    /// Flip a day open or closed. Returns whether it is now expanded.
    pub fn toggle_day(&self, date: NaiveDate) -> bool {
        let mut state = self.lock();
        if state.day(date).is_none() {
            return false;
        }
        if state.expanded.remove(&date) {
            false
        } else {
            state.expanded.insert(date);
            true
        }
    }

    pub fn day_detail(&self, date: NaiveDate) -> Option<DayDetail> {
        let state = self.lock();
        let day = state.day(date)?;
        Some(DayDetail {
            date,
            sheet: balance_sheet(day),
            transactions: signed_transactions(day),
        })
    }

    pub fn kpis(&self) -> Option<LedgerKpis> {
        let summary = self.lock().summary?;
        Some(LedgerKpis {
            total_income: self.money.format_kpi(summary.total_income),
            total_expenses: self.money.format_kpi(summary.total_expenses),
            net_profit_loss: self.money.format_kpi(summary.net_profit_loss),
            opening_balance: self.money.format_kpi(summary.opening_balance),
            current_balance: self.money.format_kpi(summary.current_balance),
        })
    }
}

//! Daily ledger aggregation and reconciliation.
//!
//! Turns a flat, dated list of ledger lines (payments, expenses, session
//! charges) into one [`LedgerDay`] per calendar day, each carrying opening,
//! credit, debit and closing triples split into cash / online / total.
//!
//! The same module checks ledgers received from the backend: every column of
//! every day must satisfy `closing = opening + credits - debits`, and each
//! day must open where the previous one closed.
//!
//! Session charges consume prepaid credit rather than moving money through a
//! payment channel, so they only touch the `total` column.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use shared::{
    EntrySource, EntryType, Instrument, InstrumentAmounts, LedgerColumn, LedgerDay, LedgerSummary,
    LedgerTransaction,
};
use std::collections::BTreeMap;
use thiserror::Error;

/// A ledger line with the calendar day it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub date: NaiveDate,
    pub transaction: LedgerTransaction,
}

impl LedgerEntry {
    fn amounts(&self) -> InstrumentAmounts {
        InstrumentAmounts::single(self.transaction.amount, self.transaction.instrument())
    }
}

/// Summary plus one day per calendar date, ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerReport {
    pub summary: LedgerSummary,
    pub days: Vec<LedgerDay>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Invalid ledger range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

/// A broken ledger identity found while reconciling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerDiscrepancy {
    /// `closing != opening + credits - debits` for one column.
    Identity {
        date: NaiveDate,
        column: LedgerColumn,
        expected: Decimal,
        actual: Decimal,
    },
    /// A day did not open where the previous day closed.
    Continuity {
        date: NaiveDate,
        column: LedgerColumn,
        previous_closing: Decimal,
        opening: Decimal,
    },
    /// Listed transactions do not add up to the day's credit or debit column.
    TransactionTotals {
        date: NaiveDate,
        entry_type: EntryType,
        column: LedgerColumn,
        listed: Decimal,
        reported: Decimal,
    },
    /// Days are not strictly ascending.
    OutOfOrder { date: NaiveDate },
}

impl std::fmt::Display for LedgerDiscrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerDiscrepancy::Identity { date, column, expected, actual } => write!(
                f,
                "{} {} closing is {} but opening + credits - debits is {}",
                date, column, actual, expected
            ),
            LedgerDiscrepancy::Continuity { date, column, previous_closing, opening } => write!(
                f,
                "{} {} opens at {} but the previous day closed at {}",
                date, column, opening, previous_closing
            ),
            LedgerDiscrepancy::TransactionTotals { date, entry_type, column, listed, reported } => write!(
                f,
                "{} {:?} {} transactions add up to {} but the day reports {}",
                date, entry_type, column, listed, reported
            ),
            LedgerDiscrepancy::OutOfOrder { date } => write!(f, "{} is out of order", date),
        }
    }
}

pub struct LedgerAggregator;

impl LedgerAggregator {
    /// Build the ledger for `[start, end]`.
    ///
    /// `opening` is the balance before the earliest entry. Entries dated
    /// before `start` roll into the first day's opening balance; entries
    /// after `end` are ignored.
    pub fn aggregate(
        opening: InstrumentAmounts,
        entries: &[LedgerEntry],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<LedgerReport, LedgerError> {
        if start > end {
            return Err(LedgerError::InvalidRange { start, end });
        }

        let mut running = opening;
        let mut by_day: BTreeMap<NaiveDate, Vec<&LedgerEntry>> = BTreeMap::new();

        for entry in entries {
            if entry.date < start {
                running = apply(running, entry);
            } else if entry.date <= end {
                by_day.entry(entry.date).or_default().push(entry);
            }
        }

        let mut days = Vec::new();
        for date in start.iter_days().take_while(|date| *date <= end) {
            let day_entries = by_day.remove(&date).unwrap_or_default();

            let mut credits = InstrumentAmounts::ZERO;
            let mut debits = InstrumentAmounts::ZERO;
            for entry in &day_entries {
                match entry.transaction.entry_type {
                    EntryType::Credit => credits = credits + entry.amounts(),
                    EntryType::Debit => debits = debits + entry.amounts(),
                }
            }

            let closing = running + credits - debits;
            days.push(LedgerDay {
                date,
                opening_balance: running,
                credits,
                debits,
                closing_balance: closing,
                transactions: day_entries.into_iter().map(|e| e.transaction.clone()).collect(),
            });
            running = closing;
        }

        let summary = summarize(&days);
        Ok(LedgerReport { summary, days })
    }

    /// Check every identity a ledger must satisfy. An empty result means the
    /// ledger reconciles.
    pub fn reconcile(days: &[LedgerDay]) -> Vec<LedgerDiscrepancy> {
        let mut discrepancies = Vec::new();

        for (index, day) in days.iter().enumerate() {
            for column in LedgerColumn::ALL {
                let expected = day.opening_balance.get(column) + day.credits.get(column) - day.debits.get(column);
                let actual = day.closing_balance.get(column);
                if expected != actual {
                    discrepancies.push(LedgerDiscrepancy::Identity {
                        date: day.date,
                        column,
                        expected,
                        actual,
                    });
                }
            }

            if !day.transactions.is_empty() {
                check_transaction_totals(day, &mut discrepancies);
            }

            let Some(previous) = index.checked_sub(1).map(|i| &days[i]) else {
                continue;
            };

            if previous.date >= day.date {
                discrepancies.push(LedgerDiscrepancy::OutOfOrder { date: day.date });
                continue;
            }

            if previous.date.succ_opt() == Some(day.date) {
                for column in LedgerColumn::ALL {
                    let previous_closing = previous.closing_balance.get(column);
                    let opening = day.opening_balance.get(column);
                    if previous_closing != opening {
                        discrepancies.push(LedgerDiscrepancy::Continuity {
                            date: day.date,
                            column,
                            previous_closing,
                            opening,
                        });
                    }
                }
            }
        }

        discrepancies
    }
}

fn apply(balance: InstrumentAmounts, entry: &LedgerEntry) -> InstrumentAmounts {
    match entry.transaction.entry_type {
        EntryType::Credit => balance + entry.amounts(),
        EntryType::Debit => balance - entry.amounts(),
    }
}

fn check_transaction_totals(day: &LedgerDay, discrepancies: &mut Vec<LedgerDiscrepancy>) {
    for (entry_type, reported) in [(EntryType::Credit, day.credits), (EntryType::Debit, day.debits)] {
        let listed = day
            .transactions
            .iter()
            .filter(|t| t.entry_type == entry_type)
            .fold(InstrumentAmounts::ZERO, |acc, t| {
                acc + InstrumentAmounts::single(t.amount, t.instrument())
            });

        for column in LedgerColumn::ALL {
            if listed.get(column) != reported.get(column) {
                discrepancies.push(LedgerDiscrepancy::TransactionTotals {
                    date: day.date,
                    entry_type,
                    column,
                    listed: listed.get(column),
                    reported: reported.get(column),
                });
            }
        }
    }
}

/// Headline figures for a run of days.
pub fn summarize(days: &[LedgerDay]) -> LedgerSummary {
    let total_income: Decimal = days.iter().map(|d| d.credits.total).sum();
    let total_expenses: Decimal = days.iter().map(|d| d.debits.total).sum();

    LedgerSummary {
        total_income,
        total_expenses,
        net_profit_loss: total_income - total_expenses,
        opening_balance: days.first().map(|d| d.opening_balance.total).unwrap_or_default(),
        current_balance: days.last().map(|d| d.closing_balance.total).unwrap_or_default(),
    }
}

/// One row of the expanded balance sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSheetRow {
    pub column: LedgerColumn,
    pub opening: Decimal,
    pub credits: Decimal,
    pub debits: Decimal,
    pub closing: Decimal,
}

/// Cash, online and total rows, in that order.
pub fn balance_sheet(day: &LedgerDay) -> [BalanceSheetRow; 3] {
    LedgerColumn::ALL.map(|column| BalanceSheetRow {
        column,
        opening: day.opening_balance.get(column),
        credits: day.credits.get(column),
        debits: day.debits.get(column),
        closing: day.closing_balance.get(column),
    })
}

/// A transaction as listed under an expanded day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub description: String,
    pub source: EntrySource,
    pub signed_amount: Decimal,
    pub instrument: Option<Instrument>,
}

pub fn signed_transactions(day: &LedgerDay) -> Vec<SignedTransaction> {
    day.transactions
        .iter()
        .map(|t| SignedTransaction {
            description: t.description.clone(),
            source: t.source,
            signed_amount: t.signed_amount(),
            instrument: t.instrument(),
        })
        .collect()
}

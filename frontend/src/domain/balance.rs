//! Balance evaluation for a session-marking attempt.
//!
//! Decides whether a patient's effective balance covers one more session.
//! Pure and synchronous: the attendance controller calls it before it shows
//! either the confirm dialog or the balance-action dialog.

use rust_decimal::{Decimal, RoundingStrategy};

/// Result of comparing a patient's effective balance with the session cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOutcome {
    /// The balance covers the session; mark directly.
    Sufficient,
    /// The balance falls short by `shortfall` (always > 0).
    Insufficient { shortfall: Decimal },
}

impl BalanceOutcome {
    pub fn is_sufficient(&self) -> bool {
        matches!(self, BalanceOutcome::Sufficient)
    }

    /// Amount to pre-fill in the payment form, if a payment is needed.
    pub fn suggested_payment(&self) -> Option<Decimal> {
        match self {
            BalanceOutcome::Sufficient => None,
            BalanceOutcome::Insufficient { shortfall } => Some(round_up_to_whole_unit(*shortfall)),
        }
    }
}

/// Classify a marking attempt.
///
/// `cost_per_day` must be non-negative; the wire types guarantee both values
/// are real decimals by the time they get here.
pub fn evaluate(effective_balance: Decimal, cost_per_day: Decimal) -> BalanceOutcome {
    debug_assert!(cost_per_day >= Decimal::ZERO, "cost_per_day must not be negative");

    if effective_balance >= cost_per_day {
        BalanceOutcome::Sufficient
    } else {
        let shortfall = (cost_per_day - effective_balance).max(Decimal::ZERO);
        BalanceOutcome::Insufficient { shortfall }
    }
}

/// Round a shortfall up to the next whole currency unit (200.01 -> 201).
pub fn round_up_to_whole_unit(amount: Decimal) -> Decimal {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::ToPositiveInfinity)
        .normalize()
}

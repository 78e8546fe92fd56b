//! Money handling for the payment sub-form and for display.
//!
//! All arithmetic stays in `Decimal`. Display rounding happens here and only
//! here: two decimal places for unit amounts, none for headline KPI cards.

use rust_decimal::{Decimal, RoundingStrategy};
use shared::PaymentMode;
use thiserror::Error;

/// Limits applied to the payment sub-form.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyRules {
    pub currency_symbol: String,
    pub max_amount: Decimal,
    pub max_remarks_length: usize,
}

impl Default for MoneyRules {
    fn default() -> Self {
        Self {
            currency_symbol: "₹".to_string(),
            max_amount: Decimal::from(1_000_000),
            max_remarks_length: 255,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyValidationError {
    #[error("Please enter an amount")]
    EmptyAmount,
    #[error("Please enter a valid amount (like 500 or 500.00): {0}")]
    InvalidAmountFormat(String),
    #[error("Amount must be greater than 0")]
    AmountNotPositive,
    #[error("Amount is too large. Maximum is {0}")]
    AmountTooLarge(Decimal),
    #[error("Use at most 2 decimal places")]
    AmountPrecisionTooHigh,
    #[error("Please select a payment mode")]
    MissingMode,
    #[error("Remarks are too long ({0} characters)")]
    RemarksTooLong(usize),
}

/// Outcome of validating the payment sub-form.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentValidation {
    pub errors: Vec<MoneyValidationError>,
    pub amount: Option<Decimal>,
    pub mode: Option<PaymentMode>,
    pub remarks: Option<String>,
}

impl PaymentValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn first_error(&self) -> Option<&MoneyValidationError> {
        self.errors.first()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MoneyService {
    rules: MoneyRules,
}

impl MoneyService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: MoneyRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &MoneyRules {
        &self.rules
    }

    /// Validate the payment sub-form. Nothing reaches the network unless this
    /// returns no errors.
    pub fn validate_payment(
        &self,
        amount_input: &str,
        mode: Option<PaymentMode>,
        remarks: &str,
    ) -> PaymentValidation {
        let mut errors = Vec::new();

        let amount = if amount_input.trim().is_empty() {
            errors.push(MoneyValidationError::EmptyAmount);
            None
        } else {
            match self.clean_and_parse_amount(amount_input) {
                Ok(amount) if amount <= Decimal::ZERO => {
                    errors.push(MoneyValidationError::AmountNotPositive);
                    None
                }
                Ok(amount) if amount > self.rules.max_amount => {
                    errors.push(MoneyValidationError::AmountTooLarge(self.rules.max_amount));
                    None
                }
                Ok(amount) if amount.normalize().scale() > 2 => {
                    errors.push(MoneyValidationError::AmountPrecisionTooHigh);
                    None
                }
                Ok(amount) => Some(amount),
                Err(message) => {
                    errors.push(MoneyValidationError::InvalidAmountFormat(message));
                    None
                }
            }
        };

        if mode.is_none() {
            errors.push(MoneyValidationError::MissingMode);
        }

        let remarks = match self.validate_remarks(remarks) {
            Ok(remarks) => remarks,
            Err(error) => {
                errors.push(error);
                None
            }
        };

        PaymentValidation {
            errors,
            amount,
            mode,
            remarks,
        }
    }

    /// Trim an operator note. Blank notes become `None`.
    pub fn validate_remarks(&self, remarks: &str) -> Result<Option<String>, MoneyValidationError> {
        let remarks = remarks.trim();
        let char_count = remarks.chars().count();
        if char_count > self.rules.max_remarks_length {
            return Err(MoneyValidationError::RemarksTooLong(char_count));
        }
        Ok((!remarks.is_empty()).then(|| remarks.to_string()))
    }

    /// Strip currency symbols, grouping commas and spaces, then parse.
    pub fn clean_and_parse_amount(&self, amount_input: &str) -> Result<Decimal, String> {
        let cleaned = amount_input
            .trim()
            .replace(&self.rules.currency_symbol, "")
            .replace(',', "")
            .replace(' ', "");

        if cleaned.is_empty() {
            return Err("Empty amount after cleaning".to_string());
        }

        cleaned
            .parse::<Decimal>()
            .map_err(|e| format!("Invalid number format: {}", e))
    }

    /// Unit amount, two decimals: `₹1,234.50`.
    pub fn format_amount(&self, amount: Decimal) -> String {
        format_with_symbol(&self.rules.currency_symbol, amount, 2)
    }

    /// Headline KPI card, no decimals: `₹1,235`.
    pub fn format_kpi(&self, amount: Decimal) -> String {
        format_with_symbol(&self.rules.currency_symbol, amount, 0)
    }

    /// Signed transaction amount: `+₹500.00` / `-₹1,200.00`.
    pub fn format_signed(&self, amount: Decimal) -> String {
        if amount < Decimal::ZERO {
            format_with_symbol(&self.rules.currency_symbol, amount, 2)
        } else {
            format!("+{}", format_with_symbol(&self.rules.currency_symbol, amount, 2))
        }
    }
}

fn format_with_symbol(symbol: &str, amount: Decimal, decimals: u32) -> String {
    let mut rounded = amount.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(decimals);

    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let digits = rounded.abs().to_string();
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits.as_str(), None),
    };

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(symbol);
    out.push_str(&group_thousands(whole));
    if let Some(fraction) = fraction {
        out.push('.');
        out.push_str(fraction);
    }
    out
}

fn group_thousands(whole: &str) -> String {
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[test]
    fn test_valid_payment_form() {
        let service = MoneyService::new();
        let validation = service.validate_payment("₹ 1,300.50", Some(PaymentMode::Upi), "  part payment ");

        assert!(validation.is_valid(), "{:?}", validation.errors);
        assert_eq!(validation.amount, Some(money("1300.50")));
        assert_eq!(validation.mode, Some(PaymentMode::Upi));
        assert_eq!(validation.remarks.as_deref(), Some("part payment"));
    }

    #[test]
    fn test_missing_mode_blocks_submission() {
        let service = MoneyService::new();
        let validation = service.validate_payment("300", None, "");

        assert!(!validation.is_valid());
        assert_eq!(validation.errors, vec![MoneyValidationError::MissingMode]);
        assert_eq!(validation.remarks, None);
    }

    #[test]
    fn test_amount_errors() {
        let service = MoneyService::new();
        let mode = Some(PaymentMode::Cash);

        assert_eq!(service.validate_payment("", mode, "").errors, vec![MoneyValidationError::EmptyAmount]);
        assert_eq!(service.validate_payment("0", mode, "").errors, vec![MoneyValidationError::AmountNotPositive]);
        assert_eq!(service.validate_payment("-5", mode, "").errors, vec![MoneyValidationError::AmountNotPositive]);
        assert_eq!(
            service.validate_payment("12.345", mode, "").errors,
            vec![MoneyValidationError::AmountPrecisionTooHigh]
        );
        assert_eq!(
            service.validate_payment("5000000", mode, "").errors,
            vec![MoneyValidationError::AmountTooLarge(Decimal::from(1_000_000))]
        );
        assert!(matches!(
            service.validate_payment("abc", mode, "").errors.as_slice(),
            [MoneyValidationError::InvalidAmountFormat(_)]
        ));
    }

    #[test]
    fn test_trailing_zeros_are_not_extra_precision() {
        let service = MoneyService::new();
        let validation = service.validate_payment("300.000", Some(PaymentMode::Cash), "");
        assert!(validation.is_valid());
    }

    #[test]
    fn test_remarks_length_limit() {
        let service = MoneyService::with_rules(MoneyRules {
            max_remarks_length: 5,
            ..MoneyRules::default()
        });
        let validation = service.validate_payment("10", Some(PaymentMode::Cash), "too long");
        assert_eq!(validation.errors, vec![MoneyValidationError::RemarksTooLong(8)]);
        assert_eq!(service.validate_remarks("  ok "), Ok(Some("ok".to_string())));
        assert_eq!(service.validate_remarks("   "), Ok(None));
    }

    #[test]
    fn test_display_formats() {
        let service = MoneyService::new();

        assert_eq!(service.format_amount(money("1234.5")), "₹1,234.50");
        assert_eq!(service.format_amount(money("0.005")), "₹0.01");
        assert_eq!(service.format_amount(money("-1200")), "-₹1,200.00");
        assert_eq!(service.format_amount(money("999")), "₹999.00");
        assert_eq!(service.format_kpi(money("1234567.5")), "₹1,234,568");
        assert_eq!(service.format_kpi(money("-0.4")), "₹0");
        assert_eq!(service.format_signed(money("500")), "+₹500.00");
        assert_eq!(service.format_signed(money("-75.25")), "-₹75.25");
    }

    #[test]
    fn test_custom_currency_symbol() {
        let service = MoneyService::with_rules(MoneyRules {
            currency_symbol: "$".to_string(),
            ..MoneyRules::default()
        });
        assert_eq!(service.format_amount(money("12")), "$12.00");
        assert_eq!(service.clean_and_parse_amount("$1,000").unwrap(), money("1000"));
    }
}

//! Input validation helpers shared by the managers

use bigdecimal::BigDecimal;

use crate::types::{CoreError, CoreResult};

/// Monetary amounts entering a workflow must be strictly positive
pub fn validate_positive_amount(amount: &BigDecimal) -> CoreResult<()> {
    if amount <= &BigDecimal::from(0) {
        return Err(CoreError::Validation(format!(
            "Amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Currency codes are ISO 4217 style: exactly three uppercase ASCII letters
pub fn validate_currency(currency: &str) -> CoreResult<()> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(CoreError::Validation(format!(
            "Currency must be a three-letter uppercase code, got '{currency}'"
        )));
    }
    Ok(())
}

/// Reject empty or whitespace-only values for a named field
pub fn validate_non_empty(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use crate::StoreError;

/// Validate an expense amount at the write boundary: a positive, finite
/// number. Nothing stricter — cents rounding is a display concern.
pub fn validate_amount(amount: f64) -> Result<(), StoreError> {
    if !amount.is_finite() {
        return Err(StoreError::InvalidAmount("must be a finite number".into()));
    }
    if amount <= 0.0 {
        return Err(StoreError::InvalidAmount("must be greater than zero".into()));
    }
    Ok(())
}

/// Normalize a description before persistence: surrounding whitespace is
/// stripped; an empty description is allowed.
pub fn normalize_description(s: &str) -> String {
    s.trim().to_string()
}

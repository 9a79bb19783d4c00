//! Money conversions between catalog prices and the payment provider's minor units.

use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

use crate::errors::ServiceError;

/// Converts a major-unit price (e.g. 129.995 GBP) to integer minor units, rounding
/// half away from zero (12999.5 -> 13000).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "Price cannot be negative: {amount}"
        )));
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|minor| minor.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| ServiceError::ValidationError(format!("Price out of range: {amount}")))
}

/// Converts provider minor units back to a two-decimal major-unit amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Provider-facing line name. The size suffix is what lets webhook attribution
/// recover the catalog product when no product id metadata is present.
pub fn display_name(name: &str, size: Option<&str>) -> String {
    match size.map(str::trim).filter(|s| !s.is_empty()) {
        Some(size) => format!("{name} ({size})"),
        None => name.to_string(),
    }
}

/// Inverse of [`display_name`]: splits `"Name (Size)"` into its parts.
pub fn parse_display_name(display: &str) -> (&str, Option<&str>) {
    let trimmed = display.trim();
    if let Some(stripped) = trimmed.strip_suffix(')') {
        if let Some(open) = stripped.rfind(" (") {
            let size = &stripped[open + 2..];
            if !size.is_empty() {
                return (&stripped[..open], Some(size));
            }
        }
    }
    (trimmed, None)
}

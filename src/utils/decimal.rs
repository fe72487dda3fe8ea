//! Decimal arithmetic utilities for financial calculations.
//!
//! Optimizer and AMM math run in `f64`; balances and capital accounting run in
//! `Decimal`. Everything crossing that boundary goes through here.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Decimal places kept when a float result enters capital accounting.
pub const DECIMAL_PRECISION: u32 = 12;

/// Round a decimal to a specific number of decimal places.
pub fn round_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp(decimals)
}

/// Convert a float into a fixed-precision decimal.
///
/// Non-finite or out-of-range values map to `None`.
pub fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| round_to_precision(d, DECIMAL_PRECISION))
}

/// Convert a float into a fixed-precision decimal, falling back to zero.
pub fn to_decimal_or_zero(value: f64) -> Decimal {
    to_decimal(value).unwrap_or(Decimal::ZERO)
}

/// Convert a decimal into a float for numeric work.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Relative change of `current` against `reference` (0.02 = +2%).
pub fn relative_change(current: Decimal, reference: Decimal) -> Decimal {
    safe_div(current - reference, reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_decimal_rounds_to_fixed_precision() {
        let d = to_decimal(0.1 + 0.2).unwrap();
        assert_eq!(d, dec!(0.3));
        assert!(d.scale() <= DECIMAL_PRECISION);
    }

    #[test]
    fn test_to_decimal_rejects_non_finite() {
        assert!(to_decimal(f64::NAN).is_none());
        assert!(to_decimal(f64::INFINITY).is_none());
        assert_eq!(to_decimal_or_zero(f64::NAN), Decimal::ZERO);
    }

    #[test]
    fn test_to_f64() {
        assert_eq!(to_f64(dec!(1.5)), 1.5);
        assert_eq!(to_f64(dec!(-0.25)), -0.25);
    }

    #[test]
    fn test_safe_div_and_relative_change() {
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(relative_change(dec!(10250), dec!(10000)), dec!(0.025));
        assert_eq!(relative_change(dec!(1), Decimal::ZERO), Decimal::ZERO);
    }
}

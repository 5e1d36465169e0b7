//! Exact decimal helpers.
//!
//! Prices and sizes travel as decimal strings. Ordering, zero detection and
//! arithmetic go through [`rust_decimal::Decimal`] so that `"0.00"`, `"0"` and
//! `"0E-8"` are all recognised as zero and `"1.10"` sorts next to `"1.1"`.

use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a decimal string, accepting plain and scientific notation.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// `true` only when `s` parses and is exactly zero. Unparseable input is not zero.
pub fn is_zero_str(s: &str) -> bool {
    parse_decimal(s).is_some_and(|d| d.is_zero())
}

/// Render `value` with exactly `dp` fractional digits (banker's rounding at `dp`).
pub fn format_fixed(value: Decimal, dp: u32) -> String {
    let mut rounded = value.round_dp(dp);
    rounded.rescale(dp);
    rounded.to_string()
}

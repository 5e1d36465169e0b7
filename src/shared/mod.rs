//! Shared utilities and types used across the WebSocket modules.

pub mod decimal;
pub mod types;

pub use decimal::{format_fixed, is_zero_str, parse_decimal};
pub use types::*;

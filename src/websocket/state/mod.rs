//! Local replicas of server state.
//!
//! - `orderbook`: price ladders with sequence-checked deltas
//! - `price`: candle history per orderbook and resolution
//! - `user`: the subscribed user's orders and balances

pub mod orderbook;
pub mod price;
pub mod user;

pub use orderbook::LocalOrderbook;
pub use price::{PriceHistory, PriceHistoryKey, MAX_CANDLES};
pub use user::{BalanceKey, BalanceMerge, UserState};

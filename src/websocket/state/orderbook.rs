//! Local orderbook state management.
//!
//! Maintains a local copy of the orderbook state, applying snapshots and
//! sequence-checked deltas from WebSocket updates. Levels are keyed by exact
//! decimal price so ordering and zero-size removal never depend on float
//! rounding.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::shared::{format_fixed, parse_decimal};
use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::types::{BookUpdateData, PriceLevel};

/// Fractional digits used for spread and midpoint strings.
pub const QUOTE_DECIMALS: u32 = 6;

#[derive(Debug, Clone, PartialEq)]
struct Level {
    price: String,
    size: String,
    amount: Decimal,
}

impl Level {
    fn to_price_level(&self) -> PriceLevel {
        PriceLevel::new(self.price.clone(), self.size.clone())
    }
}

/// A parsed level ready to be written; `None` removes the price.
type LevelChange = (Decimal, Option<Level>);

fn parse_levels(levels: &[PriceLevel]) -> WsResult<Vec<LevelChange>> {
    levels
        .iter()
        .map(|level| {
            let price = parse_decimal(&level.price).ok_or_else(|| {
                WebSocketError::ProtocolError(format!("invalid price: {:?}", level.price))
            })?;
            let amount = parse_decimal(&level.size).ok_or_else(|| {
                WebSocketError::ProtocolError(format!("invalid size: {:?}", level.size))
            })?;
            let change = if amount.is_zero() {
                None
            } else {
                Some(Level {
                    price: level.price.clone(),
                    size: level.size.clone(),
                    amount,
                })
            };
            Ok((price, change))
        })
        .collect()
}

fn next_sequence(seq: u64) -> WsResult<u64> {
    seq.checked_add(1)
        .ok_or_else(|| WebSocketError::ProtocolError(format!("sequence overflow at {}", seq)))
}

fn sum_sizes<'a>(mut levels: impl Iterator<Item = &'a Level>) -> Option<Decimal> {
    levels.try_fold(Decimal::ZERO, |acc, l| acc.checked_add(l.amount))
}

fn write_levels(side: &mut BTreeMap<Decimal, Level>, changes: Vec<LevelChange>) {
    for (price, change) in changes {
        match change {
            Some(level) => {
                side.insert(price, level);
            }
            None => {
                side.remove(&price);
            }
        }
    }
}

/// Local orderbook state
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOrderbook {
    /// Orderbook identifier
    pub orderbook_id: String,
    /// Bid levels; best bid is the last key
    bids: BTreeMap<Decimal, Level>,
    /// Ask levels; best ask is the first key
    asks: BTreeMap<Decimal, Level>,
    /// Expected next sequence number
    expected_seq: u64,
    /// Whether initial snapshot has been received
    has_snapshot: bool,
    /// Last update timestamp
    last_timestamp: Option<String>,
}

impl LocalOrderbook {
    /// Create a new empty orderbook
    pub fn new(orderbook_id: String) -> Self {
        Self {
            orderbook_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            expected_seq: 0,
            has_snapshot: false,
            last_timestamp: None,
        }
    }

    /// Replace both sides with the snapshot contents.
    ///
    /// Zero-size levels in the snapshot are skipped. A level that fails to
    /// parse rejects the whole snapshot and leaves the book untouched.
    pub fn apply_snapshot(&mut self, update: &BookUpdateData) -> WsResult<()> {
        let next_seq = next_sequence(update.seq)?;
        let bids = parse_levels(&update.bids)?;
        let asks = parse_levels(&update.asks)?;

        self.bids.clear();
        self.asks.clear();
        write_levels(&mut self.bids, bids);
        write_levels(&mut self.asks, asks);

        self.expected_seq = next_seq;
        self.has_snapshot = true;
        self.last_timestamp = Some(update.timestamp.clone());
        Ok(())
    }

    /// Apply a delta update
    ///
    /// Returns [`WebSocketError::SequenceGap`] when `seq` is not the expected
    /// one. Nothing is written unless every level in the delta is valid.
    pub fn apply_delta(&mut self, update: &BookUpdateData) -> WsResult<()> {
        if update.seq != self.expected_seq {
            return Err(WebSocketError::SequenceGap {
                expected: self.expected_seq,
                received: update.seq,
            });
        }

        let next_seq = next_sequence(update.seq)?;
        let bids = parse_levels(&update.bids)?;
        let asks = parse_levels(&update.asks)?;
        write_levels(&mut self.bids, bids);
        write_levels(&mut self.asks, asks);

        self.expected_seq = next_seq;
        self.last_timestamp = Some(update.timestamp.clone());
        Ok(())
    }

    /// Apply an update (snapshot or delta)
    pub fn apply_update(&mut self, update: &BookUpdateData) -> WsResult<()> {
        if update.is_snapshot {
            self.apply_snapshot(update)
        } else {
            self.apply_delta(update)
        }
    }

    /// Get all bid levels sorted by price (descending)
    pub fn get_bids(&self) -> Vec<PriceLevel> {
        self.bids.values().rev().map(Level::to_price_level).collect()
    }

    /// Get all ask levels sorted by price (ascending)
    pub fn get_asks(&self) -> Vec<PriceLevel> {
        self.asks.values().map(Level::to_price_level).collect()
    }

    /// Get top N bid levels
    pub fn get_top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.bids
            .values()
            .rev()
            .take(n)
            .map(Level::to_price_level)
            .collect()
    }

    /// Get top N ask levels
    pub fn get_top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.asks.values().take(n).map(Level::to_price_level).collect()
    }

    /// Highest bid as (price, size)
    pub fn best_bid(&self) -> Option<(String, String)> {
        self.bids
            .values()
            .next_back()
            .map(|l| (l.price.clone(), l.size.clone()))
    }

    /// Lowest ask as (price, size)
    pub fn best_ask(&self) -> Option<(String, String)> {
        self.asks
            .values()
            .next()
            .map(|l| (l.price.clone(), l.size.clone()))
    }

    fn best_prices(&self) -> Option<(Decimal, Decimal)> {
        let bid = self.bids.keys().next_back()?;
        let ask = self.asks.keys().next()?;
        Some((*bid, *ask))
    }

    /// `ask - bid` with six decimals, `"0.000000"` when the book is crossed or locked.
    /// `None` if the difference overflows.
    pub fn spread(&self) -> Option<String> {
        let (bid, ask) = self.best_prices()?;
        let spread = if ask > bid {
            ask.checked_sub(bid)?
        } else {
            Decimal::ZERO
        };
        Some(format_fixed(spread, QUOTE_DECIMALS))
    }

    /// `(bid + ask) / 2` with six decimals, `None` if the sum overflows.
    pub fn midpoint(&self) -> Option<String> {
        let (bid, ask) = self.best_prices()?;
        let mid = bid.checked_add(ask)?.checked_div(Decimal::TWO)?;
        Some(format_fixed(mid, QUOTE_DECIMALS))
    }

    /// Size resting at `price` on the bid side
    pub fn bid_size_at(&self, price: &str) -> Option<String> {
        let key = parse_decimal(price)?;
        self.bids.get(&key).map(|l| l.size.clone())
    }

    /// Size resting at `price` on the ask side
    pub fn ask_size_at(&self, price: &str) -> Option<String> {
        let key = parse_decimal(price)?;
        self.asks.get(&key).map(|l| l.size.clone())
    }

    /// Sum of all bid sizes, `None` if it does not fit in a `Decimal`
    pub fn total_bid_depth(&self) -> Option<Decimal> {
        sum_sizes(self.bids.values())
    }

    /// Sum of all ask sizes, `None` if it does not fit in a `Decimal`
    pub fn total_ask_depth(&self) -> Option<Decimal> {
        sum_sizes(self.asks.values())
    }

    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }

    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    pub fn expected_sequence(&self) -> u64 {
        self.expected_seq
    }

    pub fn last_timestamp(&self) -> Option<&str> {
        self.last_timestamp.as_deref()
    }

    /// Drop all levels and wait for a fresh snapshot
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.expected_seq = 0;
        self.has_snapshot = false;
        self.last_timestamp = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(pairs: &[(&str, &str)]) -> Vec<PriceLevel> {
        pairs.iter().map(|(p, s)| PriceLevel::new(*p, *s)).collect()
    }

    fn update(
        seq: u64,
        is_snapshot: bool,
        bids: &[(&str, &str)],
        asks: &[(&str, &str)],
    ) -> BookUpdateData {
        BookUpdateData {
            orderbook_id: "ob1".to_string(),
            timestamp: format!("2024-01-01T00:00:{:02}.000Z", seq % 60),
            seq,
            bids: levels(bids),
            asks: levels(asks),
            is_snapshot,
            resync: false,
            message: None,
        }
    }

    #[test]
    fn test_snapshot_then_delta_removes_level() {
        let mut book = LocalOrderbook::new("ob1".to_string());
        book.apply_snapshot(&update(10, true, &[("1.00", "5")], &[("1.01", "3")]))
            .unwrap();

        assert_eq!(book.best_bid(), Some(("1.00".to_string(), "5".to_string())));
        assert_eq!(book.best_ask(), Some(("1.01".to_string(), "3".to_string())));
        assert_eq!(book.spread().as_deref(), Some("0.010000"));
        assert_eq!(book.midpoint().as_deref(), Some("1.005000"));
        assert_eq!(book.expected_sequence(), 11);

        book.apply_delta(&update(11, false, &[("1.00", "0")], &[])).unwrap();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.spread(), None);
        assert_eq!(book.expected_sequence(), 12);
    }

    #[test]
    fn test_sequence_gap_leaves_state_untouched() {
        let mut book = LocalOrderbook::new("ob1".to_string());
        book.apply_snapshot(&update(10, true, &[("0.50", "1")], &[("0.60", "2")]))
            .unwrap();
        let before = book.clone();

        let err = book
            .apply_delta(&update(15, false, &[("0.55", "9")], &[]))
            .unwrap_err();
        assert_eq!(err, WebSocketError::SequenceGap { expected: 11, received: 15 });
        assert_eq!(book, before);
    }

    #[test]
    fn test_invalid_level_rejects_whole_delta() {
        let mut book = LocalOrderbook::new("ob1".to_string());
        book.apply_snapshot(&update(1, true, &[("0.50", "1")], &[])).unwrap();
        let before = book.clone();

        let err = book
            .apply_delta(&update(2, false, &[("0.49", "4"), ("0.48", "lots")], &[]))
            .unwrap_err();
        assert!(matches!(err, WebSocketError::ProtocolError(_)));
        assert_eq!(book, before);
    }

    #[test]
    fn test_deltas_accumulate_in_order() {
        let mut book = LocalOrderbook::new("ob1".to_string());
        book.apply_snapshot(&update(0, true, &[], &[])).unwrap();

        book.apply_delta(&update(1, false, &[("0.40", "1"), ("0.45", "2")], &[("0.55", "1")]))
            .unwrap();
        book.apply_delta(&update(2, false, &[("0.40", "3")], &[("0.52", "4")]))
            .unwrap();
        book.apply_delta(&update(3, false, &[("0.45", "0.000")], &[("0.55", "0E-6")]))
            .unwrap();

        assert_eq!(book.expected_sequence(), 4);
        assert_eq!(book.get_bids(), levels(&[("0.40", "3")]));
        assert_eq!(book.get_asks(), levels(&[("0.52", "4")]));
        assert_eq!(book.total_bid_depth(), Some(Decimal::from(3)));
        assert_eq!(book.total_ask_depth(), Some(Decimal::from(4)));
    }

    #[test]
    fn test_snapshot_is_idempotent_and_resets_sequence() {
        let snapshot = update(7, true, &[("0.3", "1"), ("0.2", "0")], &[("0.7", "1")]);
        let mut book = LocalOrderbook::new("ob1".to_string());
        book.apply_snapshot(&snapshot).unwrap();
        let first = book.clone();
        book.apply_snapshot(&snapshot).unwrap();
        assert_eq!(book, first);
        assert_eq!(book.bid_count(), 1);

        book.apply_snapshot(&update(2, true, &[], &[])).unwrap();
        assert_eq!(book.expected_sequence(), 3);
    }

    #[test]
    fn test_ordering_is_numeric() {
        let mut book = LocalOrderbook::new("ob1".to_string());
        book.apply_snapshot(&update(
            1,
            true,
            &[("0.9", "1"), ("0.10", "1"), ("0.095", "1")],
            &[("1.2", "1"), ("1.10", "2"), ("1.11", "3")],
        ))
        .unwrap();

        let bids: Vec<_> = book.get_top_bids(2).into_iter().map(|l| l.price).collect();
        assert_eq!(bids, vec!["0.9", "0.10"]);
        let asks: Vec<_> = book.get_top_asks(5).into_iter().map(|l| l.price).collect();
        assert_eq!(asks, vec!["1.10", "1.11", "1.2"]);
        assert_eq!(book.ask_size_at("1.1").as_deref(), Some("2"));
        assert_eq!(book.bid_size_at("0.5"), None);
    }

    #[test]
    fn test_crossed_book_spread() {
        let mut book = LocalOrderbook::new("ob1".to_string());
        book.apply_snapshot(&update(1, true, &[("0.60", "1")], &[("0.55", "1")]))
            .unwrap();
        assert_eq!(book.spread().as_deref(), Some("0.000000"));
    }

    #[test]
    fn test_clear() {
        let mut book = LocalOrderbook::new("ob1".to_string());
        book.apply_snapshot(&update(5, true, &[("0.5", "1")], &[])).unwrap();
        book.clear();
        assert!(!book.has_snapshot());
        assert_eq!(book.bid_count(), 0);
        assert_eq!(book.expected_sequence(), 0);
        assert_eq!(book.last_timestamp(), None);
    }

    #[test]
    fn test_max_sequence_is_rejected_without_mutation() {
        let mut book = LocalOrderbook::new("ob1".to_string());
        let err = book
            .apply_snapshot(&update(u64::MAX, true, &[("0.5", "1")], &[]))
            .unwrap_err();
        assert!(matches!(err, WebSocketError::ProtocolError(_)));
        assert!(!book.has_snapshot());
        assert_eq!(book.bid_count(), 0);

        book.apply_snapshot(&update(u64::MAX - 1, true, &[("0.5", "1")], &[]))
            .unwrap();
        assert_eq!(book.expected_sequence(), u64::MAX);
        let before = book.clone();

        let err = book
            .apply_delta(&update(u64::MAX, false, &[("0.4", "2")], &[]))
            .unwrap_err();
        assert!(matches!(err, WebSocketError::ProtocolError(_)));
        assert_eq!(book, before);
    }

    #[test]
    fn test_aggregates_near_decimal_max_do_not_panic() {
        let mut book = LocalOrderbook::new("ob1".to_string());
        book.apply_snapshot(&update(
            1,
            true,
            &[
                ("79228162514264337593543950335", "79228162514264337593543950335"),
                ("79228162514264337593543950334", "79228162514264337593543950334"),
            ],
            &[("79228162514264337593543950335", "1")],
        ))
        .unwrap();

        assert_eq!(book.total_bid_depth(), None);
        assert_eq!(book.total_ask_depth(), Some(Decimal::ONE));
        assert_eq!(book.midpoint(), None);
        assert_eq!(book.spread().as_deref(), Some("0.000000"));
    }
}

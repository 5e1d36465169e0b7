//! Price history state management.
//!
//! Candles are kept newest-first with a timestamp index for in-place updates.

use std::collections::HashMap;

use crate::shared::Resolution;
use crate::websocket::types::{Candle, PriceEventType, PriceHistoryData};

/// Maximum candles retained per history; older ones fall off the tail.
pub const MAX_CANDLES: usize = 1000;

/// Key for price history subscriptions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriceHistoryKey {
    pub orderbook_id: String,
    pub resolution: Resolution,
}

impl PriceHistoryKey {
    pub fn new(orderbook_id: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            orderbook_id: orderbook_id.into(),
            resolution,
        }
    }
}

/// Price history state for a single orderbook/resolution pair
#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    pub orderbook_id: String,
    pub resolution: Resolution,
    /// Whether OHLCV data is included
    pub include_ohlcv: bool,
    /// Candles sorted by timestamp (newest first)
    candles: Vec<Candle>,
    /// Timestamp to position in `candles`
    candle_index: HashMap<i64, usize>,
    last_timestamp: Option<i64>,
    server_time: Option<i64>,
    has_snapshot: bool,
}

impl PriceHistory {
    pub fn new(orderbook_id: String, resolution: Resolution, include_ohlcv: bool) -> Self {
        Self {
            orderbook_id,
            resolution,
            include_ohlcv,
            candles: Vec::new(),
            candle_index: HashMap::new(),
            last_timestamp: None,
            server_time: None,
            has_snapshot: false,
        }
    }

    pub fn key(&self) -> PriceHistoryKey {
        PriceHistoryKey::new(self.orderbook_id.clone(), self.resolution)
    }

    /// Replace all candles with the snapshot.
    ///
    /// The snapshot is re-sorted newest-first whatever order it arrives in;
    /// duplicate timestamps keep their first occurrence.
    pub fn apply_snapshot(&mut self, data: &PriceHistoryData) {
        let mut prices = data.prices.clone();
        prices.sort_by(|a, b| b.t.cmp(&a.t));
        prices.dedup_by_key(|c| c.t);
        prices.truncate(MAX_CANDLES);

        self.candle_index = prices.iter().enumerate().map(|(i, c)| (c.t, i)).collect();
        self.candles = prices;

        self.last_timestamp = data
            .last_timestamp
            .or_else(|| self.candles.first().map(|c| c.t));
        if data.server_time.is_some() {
            self.server_time = data.server_time;
        }
        self.has_snapshot = true;

        if let Some(include_ohlcv) = data.include_ohlcv {
            self.include_ohlcv = include_ohlcv;
        }
    }

    /// Apply the inline candle of an update event
    pub fn apply_update(&mut self, data: &PriceHistoryData) {
        match data.to_candle() {
            Some(candle) => self.upsert_candle(candle),
            None => tracing::debug!(
                orderbook_id = %self.orderbook_id,
                "price update without timestamp"
            ),
        }
    }

    /// Replace a known candle in place or insert a new one in order
    pub fn upsert_candle(&mut self, candle: Candle) {
        if let Some(&idx) = self.candle_index.get(&candle.t) {
            self.candles[idx] = candle;
        } else {
            let insert_pos = self
                .candles
                .iter()
                .position(|c| c.t < candle.t)
                .unwrap_or(self.candles.len());

            for idx in self.candle_index.values_mut() {
                if *idx >= insert_pos {
                    *idx += 1;
                }
            }

            self.candle_index.insert(candle.t, insert_pos);
            self.candles.insert(insert_pos, candle);

            while self.candles.len() > MAX_CANDLES {
                if let Some(removed) = self.candles.pop() {
                    self.candle_index.remove(&removed.t);
                }
            }
        }

        if let Some(first) = self.candles.first() {
            self.last_timestamp = Some(first.t);
        }
    }

    /// Heartbeats only move the server clock
    pub fn apply_heartbeat(&mut self, data: &PriceHistoryData) {
        if data.server_time.is_some() {
            self.server_time = data.server_time;
        }
    }

    /// Apply any price history event
    pub fn apply_event(&mut self, data: &PriceHistoryData) {
        match data.event_type {
            PriceEventType::Snapshot => self.apply_snapshot(data),
            PriceEventType::Update => self.apply_update(data),
            PriceEventType::Heartbeat => self.apply_heartbeat(data),
            PriceEventType::Unknown => {
                tracing::warn!(
                    orderbook_id = %self.orderbook_id,
                    "unknown price history event type"
                );
            }
        }
    }

    /// Get all candles (newest first)
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Get the N most recent candles
    pub fn recent_candles(&self, n: usize) -> &[Candle] {
        let end = n.min(self.candles.len());
        &self.candles[..end]
    }

    /// Get a candle by timestamp
    pub fn get_candle(&self, timestamp: i64) -> Option<&Candle> {
        self.candle_index.get(&timestamp).map(|&idx| &self.candles[idx])
    }

    pub fn latest_candle(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn oldest_candle(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Midpoint of the most recent candle
    pub fn current_midpoint(&self) -> Option<String> {
        self.candles.first().and_then(|c| c.m.clone())
    }

    /// Best bid of the most recent candle
    pub fn current_best_bid(&self) -> Option<String> {
        self.candles.first().and_then(|c| c.bb.clone())
    }

    /// Best ask of the most recent candle
    pub fn current_best_ask(&self) -> Option<String> {
        self.candles.first().and_then(|c| c.ba.clone())
    }

    pub fn candle_count(&self) -> usize {
        self.candles.len()
    }

    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    pub fn server_time(&self) -> Option<i64> {
        self.server_time
    }

    /// Clear the price history (for disconnect/resync)
    pub fn clear(&mut self) {
        self.candles.clear();
        self.candle_index.clear();
        self.last_timestamp = None;
        self.server_time = None;
        self.has_snapshot = false;
    }
}

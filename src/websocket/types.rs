//! Message types for the Lightcone WebSocket protocol.
//!
//! This module contains all request and response types for the WebSocket API,
//! plus the [`WsEvent`] union handed to the application.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::WebSocketError;
use crate::shared::Resolution;

// ============================================================================
// REQUEST TYPES (Client → Server)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMethod {
    Subscribe,
    Unsubscribe,
    Ping,
}

/// Subscribe/Unsubscribe/Ping request wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsRequest {
    pub method: RequestMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<SubscribeParams>,
}

impl WsRequest {
    /// Create a subscribe request
    pub fn subscribe(params: SubscribeParams) -> Self {
        Self {
            method: RequestMethod::Subscribe,
            params: Some(params),
        }
    }

    /// Create an unsubscribe request
    pub fn unsubscribe(params: SubscribeParams) -> Self {
        Self {
            method: RequestMethod::Unsubscribe,
            params: Some(params),
        }
    }

    /// Create a ping request
    pub fn ping() -> Self {
        Self {
            method: RequestMethod::Ping,
            params: None,
        }
    }

    pub fn to_json(&self) -> Result<String, WebSocketError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Subscription parameters, tagged by topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscribeParams {
    /// Orderbook snapshots and deltas
    BookUpdate { orderbook_ids: Vec<String> },
    /// Trade executions
    Trades { orderbook_ids: Vec<String> },
    /// Orders and balances of one user
    User { user: String },
    /// Candles for one orderbook at one resolution
    PriceHistory {
        orderbook_id: String,
        resolution: Resolution,
        #[serde(default)]
        include_ohlcv: bool,
    },
    /// Market lifecycle events (`"all"` for every market)
    Market { market_pubkey: String },
}

impl SubscribeParams {
    pub fn book_update(orderbook_ids: Vec<String>) -> Self {
        Self::BookUpdate { orderbook_ids }
    }

    pub fn trades(orderbook_ids: Vec<String>) -> Self {
        Self::Trades { orderbook_ids }
    }

    pub fn user(user: String) -> Self {
        Self::User { user }
    }

    pub fn price_history(
        orderbook_id: String,
        resolution: Resolution,
        include_ohlcv: bool,
    ) -> Self {
        Self::PriceHistory {
            orderbook_id,
            resolution,
            include_ohlcv,
        }
    }

    pub fn market(market_pubkey: String) -> Self {
        Self::Market { market_pubkey }
    }

    /// Topic name as it appears in the `type` field.
    pub fn subscription_type(&self) -> &'static str {
        match self {
            Self::BookUpdate { .. } => "book_update",
            Self::Trades { .. } => "trades",
            Self::User { .. } => "user",
            Self::PriceHistory { .. } => "price_history",
            Self::Market { .. } => "market",
        }
    }
}

// ============================================================================
// RESPONSE TYPES (Server → Client)
// ============================================================================

fn default_version() -> f32 {
    0.1
}

/// Envelope of every inbound frame
#[derive(Debug, Clone, Deserialize)]
pub struct RawWsMessage {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default = "default_version")]
    pub version: f32,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Inbound topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    BookUpdate,
    Trades,
    User,
    PriceHistory,
    Market,
    Error,
    Pong,
    #[serde(other)]
    Unknown,
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s {
            "book_update" => Self::BookUpdate,
            "trades" => Self::Trades,
            "user" => Self::User,
            "price_history" => Self::PriceHistory,
            "market" => Self::Market,
            "error" => Self::Error,
            "pong" => Self::Pong,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// BOOK UPDATE TYPES
// ============================================================================

/// Orderbook snapshot/delta data
#[derive(Debug, Clone, Deserialize)]
pub struct BookUpdateData {
    pub orderbook_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    #[serde(default)]
    pub is_snapshot: bool,
    #[serde(default)]
    pub resync: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Price level in the orderbook
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PriceLevel {
    /// Price as decimal string (e.g., "0.500000")
    pub price: String,
    /// Size as decimal string; zero removes the level
    pub size: String,
}

impl PriceLevel {
    pub fn new(price: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            size: size.into(),
        }
    }
}

// ============================================================================
// TRADE TYPES
// ============================================================================

/// Trade execution data
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TradeData {
    pub orderbook_id: String,
    /// Price as decimal string
    pub price: String,
    /// Size as decimal string
    pub size: String,
    pub side: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub trade_id: String,
    #[serde(default)]
    pub sequence: u64,
}

// ============================================================================
// USER EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserEventType {
    Snapshot,
    OrderUpdate,
    BalanceUpdate,
    #[serde(other)]
    Unknown,
}

/// User event data (snapshot, order_update, balance_update)
#[derive(Debug, Clone, Deserialize)]
pub struct UserEventData {
    pub event_type: UserEventType,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub balances: HashMap<String, BalanceEntry>,
    #[serde(default)]
    pub order: Option<OrderUpdate>,
    #[serde(default)]
    pub balance: Option<Balance>,
    #[serde(default)]
    pub market_pubkey: Option<String>,
    #[serde(default)]
    pub orderbook_id: Option<String>,
    #[serde(default)]
    pub deposit_mint: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Open order of the subscribed user
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Order {
    pub order_hash: String,
    pub market_pubkey: String,
    pub orderbook_id: String,
    /// 0 = BUY, 1 = SELL
    pub side: i32,
    /// Maker amount as decimal string
    pub maker_amount: String,
    /// Taker amount as decimal string
    pub taker_amount: String,
    /// Remaining amount as decimal string
    pub remaining: String,
    /// Filled amount as decimal string
    pub filled: String,
    /// Price as decimal string
    pub price: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub expiration: i64,
}

/// Order update from real-time event
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderUpdate {
    pub order_hash: String,
    /// Price as decimal string
    pub price: String,
    /// Fill amount as decimal string
    #[serde(default)]
    pub fill_amount: String,
    /// Remaining amount as decimal string
    pub remaining: String,
    /// Filled amount as decimal string
    #[serde(default)]
    pub filled: String,
    /// 0 = BUY, 1 = SELL
    pub side: i32,
    #[serde(default)]
    pub is_maker: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub balance: Option<Balance>,
}

/// Outcome balances carried by an update
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Balance {
    pub outcomes: Vec<OutcomeBalance>,
}

/// Individual outcome balance
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutcomeBalance {
    pub outcome_index: i32,
    pub mint: String,
    /// Idle balance as decimal string
    pub idle: String,
    /// On-book balance as decimal string
    pub on_book: String,
}

/// Balance entry keyed by (market, deposit mint)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BalanceEntry {
    pub market_pubkey: String,
    pub deposit_mint: String,
    pub outcomes: Vec<OutcomeBalance>,
}

// ============================================================================
// PRICE HISTORY TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceEventType {
    Snapshot,
    Update,
    Heartbeat,
    #[serde(other)]
    Unknown,
}

/// Price history data (snapshot, update, heartbeat)
#[derive(Debug, Clone, Deserialize)]
pub struct PriceHistoryData {
    pub event_type: PriceEventType,
    #[serde(default)]
    pub orderbook_id: Option<String>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub include_ohlcv: Option<bool>,
    #[serde(default)]
    pub prices: Vec<Candle>,
    #[serde(default)]
    pub last_timestamp: Option<i64>,
    #[serde(default)]
    pub server_time: Option<i64>,
    // Update events carry the candle inline
    #[serde(default)]
    pub t: Option<i64>,
    #[serde(default)]
    pub o: Option<String>,
    #[serde(default)]
    pub h: Option<String>,
    #[serde(default)]
    pub l: Option<String>,
    #[serde(default)]
    pub c: Option<String>,
    #[serde(default)]
    pub v: Option<String>,
    #[serde(default)]
    pub m: Option<String>,
    #[serde(default)]
    pub bb: Option<String>,
    #[serde(default)]
    pub ba: Option<String>,
}

impl PriceHistoryData {
    /// The inline candle of an update event, if it has a timestamp.
    pub fn to_candle(&self) -> Option<Candle> {
        self.t.map(|t| Candle {
            t,
            o: self.o.clone(),
            h: self.h.clone(),
            l: self.l.clone(),
            c: self.c.clone(),
            v: self.v.clone(),
            m: self.m.clone(),
            bb: self.bb.clone(),
            ba: self.ba.clone(),
        })
    }
}

/// OHLCV candle data
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    /// Timestamp (Unix ms)
    pub t: i64,
    /// Open price as decimal string (null if no trades)
    #[serde(default)]
    pub o: Option<String>,
    /// High price as decimal string (null if no trades)
    #[serde(default)]
    pub h: Option<String>,
    /// Low price as decimal string (null if no trades)
    #[serde(default)]
    pub l: Option<String>,
    /// Close price as decimal string (null if no trades)
    #[serde(default)]
    pub c: Option<String>,
    /// Volume as decimal string (null if no trades)
    #[serde(default)]
    pub v: Option<String>,
    /// Midpoint: (best_bid + best_ask) / 2 as decimal string
    #[serde(default)]
    pub m: Option<String>,
    /// Best bid price as decimal string
    #[serde(default)]
    pub bb: Option<String>,
    /// Best ask price as decimal string
    #[serde(default)]
    pub ba: Option<String>,
}

impl Candle {
    /// Bare candle with only a timestamp.
    pub fn at(t: i64) -> Self {
        Self {
            t,
            o: None,
            h: None,
            l: None,
            c: None,
            v: None,
            m: None,
            bb: None,
            ba: None,
        }
    }
}

// ============================================================================
// MARKET EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketEventType {
    OrderbookCreated,
    Settled,
    Opened,
    Paused,
    #[serde(other)]
    Unknown,
}

/// Market event data
#[derive(Debug, Clone, Deserialize)]
pub struct MarketEventData {
    pub event_type: MarketEventType,
    pub market_pubkey: String,
    #[serde(default)]
    pub orderbook_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Error frame sent by the server
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub error: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub orderbook_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    EngineUnavailable,
    InvalidJson,
    InvalidMethod,
    RateLimited,
    Unknown,
}

impl From<&str> for ErrorCode {
    fn from(s: &str) -> Self {
        match s {
            "ENGINE_UNAVAILABLE" => Self::EngineUnavailable,
            "INVALID_JSON" => Self::InvalidJson,
            "INVALID_METHOD" => Self::InvalidMethod,
            "RATE_LIMITED" => Self::RateLimited,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// CLIENT EVENTS
// ============================================================================

/// Events emitted by the WebSocket client
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    /// Connected, or reconnected with subscriptions replayed
    Connected,

    /// Link lost or closed
    Disconnected { reason: String },

    /// Orderbook replica changed
    BookUpdate {
        orderbook_id: String,
        is_snapshot: bool,
    },

    /// Trade executed
    Trade {
        orderbook_id: String,
        trade: TradeData,
    },

    /// User replica changed
    UserUpdate {
        event_type: UserEventType,
        user: String,
    },

    /// Price history replica changed
    PriceUpdate {
        orderbook_id: String,
        resolution: Resolution,
    },

    /// Market lifecycle event
    MarketEvent {
        event_type: MarketEventType,
        market_pubkey: String,
        orderbook_id: Option<String>,
    },

    /// Error occurred
    Error { error: WebSocketError },

    /// Orderbook replica was cleared and must be re-seeded
    ResyncRequired { orderbook_id: String },

    /// Pong received
    Pong,

    /// Reconnect attempt starting (1-based)
    Reconnecting { attempt: u32 },
}

impl WsEvent {
    pub fn error(error: WebSocketError) -> Self {
        Self::Error { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_parsing() {
        assert_eq!(MessageType::from("book_update"), MessageType::BookUpdate);
        assert_eq!(MessageType::from("price_history"), MessageType::PriceHistory);
        assert_eq!(MessageType::from("ticker"), MessageType::Unknown);
    }

    #[test]
    fn test_subscribe_params_wire_format() {
        let params = SubscribeParams::book_update(vec!["market1:ob1".to_string()]);
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            serde_json::json!({"type": "book_update", "orderbook_ids": ["market1:ob1"]})
        );

        let params =
            SubscribeParams::price_history("ob1".to_string(), Resolution::FiveMinutes, true);
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            serde_json::json!({
                "type": "price_history",
                "orderbook_id": "ob1",
                "resolution": "5m",
                "include_ohlcv": true
            })
        );

        let params = SubscribeParams::user("alice".to_string());
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            serde_json::json!({"type": "user", "user": "alice"})
        );
    }

    #[test]
    fn test_ws_request_serialization() {
        assert_eq!(WsRequest::ping().to_json().unwrap(), r#"{"method":"ping"}"#);

        let request = WsRequest::unsubscribe(SubscribeParams::market("all".to_string()));
        assert_eq!(
            request.to_json().unwrap(),
            r#"{"method":"unsubscribe","params":{"type":"market","market_pubkey":"all"}}"#
        );
    }

    #[test]
    fn test_book_update_deserialization() {
        let json = r#"{
            "orderbook_id": "ob1",
            "timestamp": "2024-01-01T00:00:00.000Z",
            "seq": 42,
            "bids": [{"side": "bid", "price": "0.500000", "size": "0.001000"}],
            "asks": [{"price": "0.510000", "size": "0.000500"}],
            "is_snapshot": true
        }"#;
        let data: BookUpdateData = serde_json::from_str(json).unwrap();
        assert_eq!(data.seq, 42);
        assert!(data.is_snapshot);
        assert!(!data.resync);
        assert_eq!(data.bids[0], PriceLevel::new("0.500000", "0.001000"));
        assert_eq!(data.asks[0].size, "0.000500");
    }

    #[test]
    fn test_unknown_event_kinds() {
        let data: MarketEventData = serde_json::from_str(
            r#"{"event_type": "delisted", "market_pubkey": "m1"}"#,
        )
        .unwrap();
        assert_eq!(data.event_type, MarketEventType::Unknown);

        let data: PriceHistoryData =
            serde_json::from_str(r#"{"event_type": "compaction"}"#).unwrap();
        assert_eq!(data.event_type, PriceEventType::Unknown);

        let data: UserEventData =
            serde_json::from_str(r#"{"event_type": "nonce_update"}"#).unwrap();
        assert_eq!(data.event_type, UserEventType::Unknown);
    }

    #[test]
    fn test_price_update_inline_candle() {
        let data: PriceHistoryData = serde_json::from_str(
            r#"{"event_type": "update", "orderbook_id": "ob1", "resolution": "1h", "t": 110, "m": "0.5"}"#,
        )
        .unwrap();
        assert_eq!(data.resolution, Some(Resolution::OneHour));
        let candle = data.to_candle().unwrap();
        assert_eq!(candle.t, 110);
        assert_eq!(candle.m.as_deref(), Some("0.5"));
    }

    #[test]
    fn test_error_code() {
        assert_eq!(ErrorCode::from("RATE_LIMITED"), ErrorCode::RateLimited);
        assert_eq!(ErrorCode::from("SOMETHING_ELSE"), ErrorCode::Unknown);
    }
}

//! Message dispatcher.
//!
//! Parses inbound frames, routes them to the matching replica and returns the
//! events to queue for the application. Every failure is turned into an
//! event here; nothing propagates to the receive loop.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::shared::Resolution;
use crate::websocket::error::WebSocketError;
use crate::websocket::state::{LocalOrderbook, PriceHistory, PriceHistoryKey, UserState};
use crate::websocket::subscriptions::SubscriptionRegistry;
use crate::websocket::types::{
    BookUpdateData, ErrorData, MarketEventData, MessageType, PriceEventType, PriceHistoryData,
    RawWsMessage, TradeData, UserEventData, WsEvent,
};

/// Dispatcher shared between the client handle (reads, lazy creation) and
/// the receive task (all replica mutation).
pub type SharedDispatcher = Arc<RwLock<MessageDispatcher>>;

fn parse_data<T: DeserializeOwned>(raw: &RawWsMessage) -> Result<T, WsEvent> {
    serde_json::from_value(raw.data.clone()).map_err(|e| {
        tracing::warn!(topic = %raw.type_, error = %e, "failed to parse message data");
        WsEvent::error(WebSocketError::MessageParseError(format!("{}: {}", raw.type_, e)))
    })
}

/// Owns every local replica
#[derive(Debug, Default)]
pub struct MessageDispatcher {
    orderbooks: HashMap<String, LocalOrderbook>,
    price_histories: HashMap<PriceHistoryKey, PriceHistory>,
    user: Option<UserState>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedDispatcher {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Handle one inbound text frame.
    ///
    /// `registry` decides which user the `user` topic belongs to.
    pub fn handle(&mut self, text: &str, registry: &SubscriptionRegistry) -> Vec<WsEvent> {
        let raw: RawWsMessage = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse WebSocket message");
                return vec![WsEvent::error(WebSocketError::MessageParseError(e.to_string()))];
            }
        };

        let outcome = match MessageType::from(raw.type_.as_str()) {
            MessageType::BookUpdate => self.handle_book_update(&raw),
            MessageType::Trades => Self::handle_trade(&raw),
            MessageType::User => self.handle_user_event(&raw, registry),
            MessageType::PriceHistory => self.handle_price_history(&raw),
            MessageType::Market => Self::handle_market_event(&raw),
            MessageType::Error => Self::handle_error(&raw),
            MessageType::Pong => Ok(vec![WsEvent::Pong]),
            MessageType::Unknown => {
                tracing::debug!(topic = %raw.type_, "ignoring unknown message type");
                Ok(Vec::new())
            }
        };

        outcome.unwrap_or_else(|event| vec![event])
    }

    fn handle_book_update(&mut self, raw: &RawWsMessage) -> Result<Vec<WsEvent>, WsEvent> {
        let data: BookUpdateData = parse_data(raw)?;
        let orderbook_id = data.orderbook_id.clone();

        if data.resync {
            tracing::info!(
                orderbook_id = %orderbook_id,
                message = ?data.message,
                "server requested resync"
            );
            return Ok(vec![WsEvent::ResyncRequired { orderbook_id }]);
        }

        let book = if data.is_snapshot {
            self.orderbooks
                .entry(orderbook_id.clone())
                .or_insert_with(|| LocalOrderbook::new(orderbook_id.clone()))
        } else {
            match self.orderbooks.get_mut(&orderbook_id) {
                Some(book) if book.has_snapshot() => book,
                _ => {
                    tracing::warn!(
                        orderbook_id = %orderbook_id,
                        seq = data.seq,
                        "delta before snapshot"
                    );
                    return Ok(vec![WsEvent::ResyncRequired { orderbook_id }]);
                }
            }
        };

        match book.apply_update(&data) {
            Ok(()) => Ok(vec![WsEvent::BookUpdate {
                orderbook_id,
                is_snapshot: data.is_snapshot,
            }]),
            Err(WebSocketError::SequenceGap { expected, received }) => {
                tracing::warn!(orderbook_id = %orderbook_id, expected, received, "sequence gap");
                book.clear();
                Ok(vec![WsEvent::ResyncRequired { orderbook_id }])
            }
            Err(e) => Ok(vec![WsEvent::error(e)]),
        }
    }

    fn handle_trade(raw: &RawWsMessage) -> Result<Vec<WsEvent>, WsEvent> {
        let trade: TradeData = parse_data(raw)?;
        Ok(vec![WsEvent::Trade {
            orderbook_id: trade.orderbook_id.clone(),
            trade,
        }])
    }

    fn handle_user_event(
        &mut self,
        raw: &RawWsMessage,
        registry: &SubscriptionRegistry,
    ) -> Result<Vec<WsEvent>, WsEvent> {
        let data: UserEventData = parse_data(raw)?;

        let Some(user) = registry.user() else {
            tracing::debug!("user event without a subscribed user");
            return Ok(Vec::new());
        };

        let state = self.activate_user(user);
        state.apply_event(&data);
        Ok(vec![WsEvent::UserUpdate {
            event_type: data.event_type,
            user: user.to_string(),
        }])
    }

    fn handle_price_history(&mut self, raw: &RawWsMessage) -> Result<Vec<WsEvent>, WsEvent> {
        let data: PriceHistoryData = parse_data(raw)?;

        if data.event_type == PriceEventType::Heartbeat {
            for history in self.price_histories.values_mut() {
                history.apply_heartbeat(&data);
            }
            return Ok(Vec::new());
        }

        let Some(orderbook_id) = data.orderbook_id.clone() else {
            return Err(WsEvent::error(WebSocketError::ProtocolError(
                "price_history event without orderbook_id".to_string(),
            )));
        };
        let resolution = data.resolution.unwrap_or_default();
        let key = PriceHistoryKey::new(orderbook_id.clone(), resolution);

        let history = match data.event_type {
            PriceEventType::Snapshot => {
                let include_ohlcv = data.include_ohlcv.unwrap_or(false);
                Some(self.price_histories.entry(key).or_insert_with(|| {
                    PriceHistory::new(orderbook_id.clone(), resolution, include_ohlcv)
                }))
            }
            _ => self.price_histories.get_mut(&key),
        };

        match history {
            Some(history) => {
                history.apply_event(&data);
                Ok(vec![WsEvent::PriceUpdate {
                    orderbook_id,
                    resolution,
                }])
            }
            None => {
                tracing::debug!(
                    orderbook_id = %orderbook_id,
                    resolution = %resolution,
                    "price update for untracked history"
                );
                Ok(Vec::new())
            }
        }
    }

    fn handle_market_event(raw: &RawWsMessage) -> Result<Vec<WsEvent>, WsEvent> {
        let data: MarketEventData = parse_data(raw)?;
        Ok(vec![WsEvent::MarketEvent {
            event_type: data.event_type,
            market_pubkey: data.market_pubkey,
            orderbook_id: data.orderbook_id,
        }])
    }

    fn handle_error(raw: &RawWsMessage) -> Result<Vec<WsEvent>, WsEvent> {
        let data: ErrorData = parse_data(raw)?;
        let error = WebSocketError::ServerError {
            code: data.code,
            message: data.error,
            orderbook_id: data.orderbook_id,
        };
        if let WebSocketError::ServerError { code, message, orderbook_id } = &error {
            tracing::warn!(
                code = %code,
                error_code = ?error.error_code(),
                orderbook_id = ?orderbook_id,
                "server error: {}",
                message
            );
        }
        Ok(vec![WsEvent::error(error)])
    }

    // ------------------------------------------------------------------
    // Replica lifecycle
    // ------------------------------------------------------------------

    /// Create an empty orderbook replica if none exists
    pub fn ensure_orderbook(&mut self, orderbook_id: &str) {
        self.orderbooks
            .entry(orderbook_id.to_string())
            .or_insert_with(|| LocalOrderbook::new(orderbook_id.to_string()));
    }

    /// Create an empty price history replica if none exists
    pub fn ensure_price_history(
        &mut self,
        orderbook_id: &str,
        resolution: Resolution,
        include_ohlcv: bool,
    ) {
        self.price_histories
            .entry(PriceHistoryKey::new(orderbook_id, resolution))
            .or_insert_with(|| {
                PriceHistory::new(orderbook_id.to_string(), resolution, include_ohlcv)
            });
    }

    /// Make `user` the active user, discarding another user's replica.
    pub fn activate_user(&mut self, user: &str) -> &mut UserState {
        if self.user.as_ref().map(|u| u.user.as_str()) != Some(user) {
            self.user = Some(UserState::new(user.to_string()));
        }
        self.user.get_or_insert_with(|| UserState::new(user.to_string()))
    }

    /// Forget the user replica if it belongs to `user`
    pub fn deactivate_user(&mut self, user: &str) {
        if self.user.as_ref().is_some_and(|u| u.user == user) {
            self.user = None;
        }
    }

    /// Reset the contents of every replica, keeping the entries.
    pub fn clear_all(&mut self) {
        for book in self.orderbooks.values_mut() {
            book.clear();
        }
        for history in self.price_histories.values_mut() {
            history.clear();
        }
        if let Some(user) = self.user.as_mut() {
            user.clear();
        }
    }

    pub fn orderbook(&self, orderbook_id: &str) -> Option<&LocalOrderbook> {
        self.orderbooks.get(orderbook_id)
    }

    pub fn price_history(
        &self,
        orderbook_id: &str,
        resolution: Resolution,
    ) -> Option<&PriceHistory> {
        self.price_histories
            .get(&PriceHistoryKey::new(orderbook_id, resolution))
    }

    pub fn user_state(&self) -> Option<&UserState> {
        self.user.as_ref()
    }

    pub fn orderbook_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.orderbooks.keys().cloned().collect();
        ids.sort();
        ids
    }
}

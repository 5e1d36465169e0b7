//! Subscription registry.
//!
//! Records every topic the application asked for so the connection manager
//! can replay them after a reconnect. Book and trade topics are sets of
//! orderbook ids, the user topic holds a single user (last write wins), price
//! history is keyed by (orderbook id, resolution) and market events by market
//! pubkey or the [`ALL_MARKETS`] sentinel.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::shared::Resolution;
use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::state::PriceHistoryKey;
use crate::websocket::types::SubscribeParams;

/// Market sentinel subscribing to events of every market.
pub const ALL_MARKETS: &str = "all";

/// Registry shared between the client handle and its receive task.
pub type SharedRegistry = Arc<RwLock<SubscriptionRegistry>>;

/// One desired subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscription {
    BookUpdate { orderbook_ids: Vec<String> },
    Trades { orderbook_ids: Vec<String> },
    User { user: String },
    PriceHistory {
        orderbook_id: String,
        resolution: Resolution,
        include_ohlcv: bool,
    },
    Market { market_pubkey: String },
}

fn require_id(kind: &str, id: &str) -> WsResult<()> {
    if id.trim().is_empty() {
        return Err(WebSocketError::InvalidSubscription(format!("{} must not be empty", kind)));
    }
    Ok(())
}

fn require_ids(ids: &[String]) -> WsResult<()> {
    if ids.is_empty() {
        return Err(WebSocketError::InvalidSubscription(
            "orderbook_ids must not be empty".to_string(),
        ));
    }
    ids.iter().try_for_each(|id| require_id("orderbook id", id))
}

impl Subscription {
    /// Reject parameters the server would never accept.
    pub fn validate(&self) -> WsResult<()> {
        match self {
            Self::BookUpdate { orderbook_ids } | Self::Trades { orderbook_ids } => {
                require_ids(orderbook_ids)
            }
            Self::User { user } => require_id("user", user),
            Self::PriceHistory { orderbook_id, .. } => require_id("orderbook id", orderbook_id),
            Self::Market { market_pubkey } => require_id("market pubkey", market_pubkey),
        }
    }

    /// Convert to SubscribeParams for sending
    pub fn to_params(&self) -> SubscribeParams {
        match self {
            Self::BookUpdate { orderbook_ids } => {
                SubscribeParams::book_update(orderbook_ids.clone())
            }
            Self::Trades { orderbook_ids } => SubscribeParams::trades(orderbook_ids.clone()),
            Self::User { user } => SubscribeParams::user(user.clone()),
            Self::PriceHistory {
                orderbook_id,
                resolution,
                include_ohlcv,
            } => SubscribeParams::price_history(orderbook_id.clone(), *resolution, *include_ohlcv),
            Self::Market { market_pubkey } => SubscribeParams::market(market_pubkey.clone()),
        }
    }

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

/// Desired subscriptions, independent of connection state
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SubscriptionRegistry {
    book_updates: BTreeSet<String>,
    trades: BTreeSet<String>,
    user: Option<String>,
    /// (orderbook_id, resolution) -> include_ohlcv
    price_history: BTreeMap<PriceHistoryKey, bool>,
    markets: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a subscription. Returns the previous user when a user
    /// subscription replaces another one.
    pub fn add(&mut self, subscription: &Subscription) -> Option<String> {
        match subscription {
            Subscription::BookUpdate { orderbook_ids } => {
                self.book_updates.extend(orderbook_ids.iter().cloned());
                None
            }
            Subscription::Trades { orderbook_ids } => {
                self.trades.extend(orderbook_ids.iter().cloned());
                None
            }
            Subscription::User { user } => self.set_user(user.clone()),
            Subscription::PriceHistory {
                orderbook_id,
                resolution,
                include_ohlcv,
            } => {
                self.price_history.insert(
                    PriceHistoryKey::new(orderbook_id.clone(), *resolution),
                    *include_ohlcv,
                );
                None
            }
            Subscription::Market { market_pubkey } => {
                self.markets.insert(market_pubkey.clone());
                None
            }
        }
    }

    /// Drop a subscription. Removing ids or keys that are not present is a no-op.
    pub fn remove(&mut self, subscription: &Subscription) {
        match subscription {
            Subscription::BookUpdate { orderbook_ids } => {
                for id in orderbook_ids {
                    self.book_updates.remove(id);
                }
            }
            Subscription::Trades { orderbook_ids } => {
                for id in orderbook_ids {
                    self.trades.remove(id);
                }
            }
            Subscription::User { user } => {
                if self.user.as_deref() == Some(user.as_str()) {
                    self.user = None;
                }
            }
            Subscription::PriceHistory {
                orderbook_id,
                resolution,
                ..
            } => {
                self.price_history
                    .remove(&PriceHistoryKey::new(orderbook_id.clone(), *resolution));
            }
            Subscription::Market { market_pubkey } => {
                self.markets.remove(market_pubkey);
            }
        }
    }

    fn set_user(&mut self, user: String) -> Option<String> {
        match self.user.replace(user) {
            Some(previous) if Some(&previous) != self.user.as_ref() => Some(previous),
            _ => None,
        }
    }

    pub fn is_subscribed_book_update(&self, orderbook_id: &str) -> bool {
        self.book_updates.contains(orderbook_id)
    }

    pub fn is_subscribed_trades(&self, orderbook_id: &str) -> bool {
        self.trades.contains(orderbook_id)
    }

    /// The single subscribed user, if any
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_subscribed_price_history(&self, orderbook_id: &str, resolution: Resolution) -> bool {
        self.price_history
            .contains_key(&PriceHistoryKey::new(orderbook_id, resolution))
    }

    /// `include_ohlcv` recorded for a price history subscription
    pub fn price_history_ohlcv(&self, key: &PriceHistoryKey) -> Option<bool> {
        self.price_history.get(key).copied()
    }

    /// Explicit subscription or the "all" sentinel
    pub fn is_subscribed_market(&self, market_pubkey: &str) -> bool {
        self.markets.contains(market_pubkey) || self.markets.contains(ALL_MARKETS)
    }

    /// Every active subscription, in a stable order, for reconnect replay.
    ///
    /// Book and trade ids are grouped into one request per topic.
    pub fn snapshot(&self) -> Vec<Subscription> {
        let mut subs = Vec::new();

        if !self.book_updates.is_empty() {
            subs.push(Subscription::BookUpdate {
                orderbook_ids: self.book_updates.iter().cloned().collect(),
            });
        }

        if !self.trades.is_empty() {
            subs.push(Subscription::Trades {
                orderbook_ids: self.trades.iter().cloned().collect(),
            });
        }

        if let Some(user) = &self.user {
            subs.push(Subscription::User { user: user.clone() });
        }

        for (key, include_ohlcv) in &self.price_history {
            subs.push(Subscription::PriceHistory {
                orderbook_id: key.orderbook_id.clone(),
                resolution: key.resolution,
                include_ohlcv: *include_ohlcv,
            });
        }

        for market_pubkey in &self.markets {
            subs.push(Subscription::Market {
                market_pubkey: market_pubkey.clone(),
            });
        }

        subs
    }

    pub fn clear(&mut self) {
        self.book_updates.clear();
        self.trades.clear();
        self.user = None;
        self.price_history.clear();
        self.markets.clear();
    }

    pub fn has_subscriptions(&self) -> bool {
        !self.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.book_updates.is_empty()
            && self.trades.is_empty()
            && self.user.is_none()
            && self.price_history.is_empty()
            && self.markets.is_empty()
    }

    /// Number of individual topics (each orderbook id counts once per topic)
    pub fn len(&self) -> usize {
        self.book_updates.len()
            + self.trades.len()
            + usize::from(self.user.is_some())
            + self.price_history.len()
            + self.markets.len()
    }

    pub fn book_update_orderbooks(&self) -> Vec<String> {
        self.book_updates.iter().cloned().collect()
    }

    pub fn trade_orderbooks(&self) -> Vec<String> {
        self.trades.iter().cloned().collect()
    }

    pub fn price_history_keys(&self) -> Vec<PriceHistoryKey> {
        self.price_history.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_book_update_set_semantics() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(&Subscription::BookUpdate { orderbook_ids: ids(&["ob1", "ob2"]) });
        registry.add(&Subscription::BookUpdate { orderbook_ids: ids(&["ob2"]) });
        assert_eq!(registry.len(), 2);
        assert!(registry.is_subscribed_book_update("ob1"));

        registry.remove(&Subscription::BookUpdate { orderbook_ids: ids(&["ob1", "ob9"]) });
        assert!(!registry.is_subscribed_book_update("ob1"));
        assert!(registry.is_subscribed_book_update("ob2"));
        assert!(!registry.is_subscribed_trades("ob2"));
    }

    #[test]
    fn test_user_last_write_wins() {
        let mut registry = SubscriptionRegistry::new();
        assert_eq!(registry.add(&Subscription::User { user: "alice".to_string() }), None);
        assert_eq!(registry.add(&Subscription::User { user: "alice".to_string() }), None);
        assert_eq!(
            registry.add(&Subscription::User { user: "bob".to_string() }),
            Some("alice".to_string())
        );
        assert_eq!(registry.user(), Some("bob"));

        registry.remove(&Subscription::User { user: "alice".to_string() });
        assert_eq!(registry.user(), Some("bob"));
        registry.remove(&Subscription::User { user: "bob".to_string() });
        assert_eq!(registry.user(), None);
    }

    #[test]
    fn test_price_history_keyed_by_resolution() {
        let mut registry = SubscriptionRegistry::new();
        let sub = |r, ohlcv| Subscription::PriceHistory {
            orderbook_id: "ob1".to_string(),
            resolution: r,
            include_ohlcv: ohlcv,
        };
        registry.add(&sub(Resolution::OneMinute, false));
        registry.add(&sub(Resolution::OneMinute, true));
        registry.add(&sub(Resolution::OneHour, false));
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.price_history_ohlcv(&PriceHistoryKey::new("ob1", Resolution::OneMinute)),
            Some(true)
        );

        registry.remove(&sub(Resolution::OneMinute, false));
        assert!(!registry.is_subscribed_price_history("ob1", Resolution::OneMinute));
        assert!(registry.is_subscribed_price_history("ob1", Resolution::OneHour));
    }

    #[test]
    fn test_all_markets_sentinel() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(&Subscription::Market { market_pubkey: "m1".to_string() });
        assert!(registry.is_subscribed_market("m1"));
        assert!(!registry.is_subscribed_market("m2"));

        registry.add(&Subscription::Market { market_pubkey: ALL_MARKETS.to_string() });
        assert!(registry.is_subscribed_market("m2"));
    }

    #[test]
    fn test_snapshot_replays_everything() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(&Subscription::BookUpdate { orderbook_ids: ids(&["ob2", "ob1"]) });
        registry.add(&Subscription::Trades { orderbook_ids: ids(&["ob1"]) });
        registry.add(&Subscription::User { user: "alice".to_string() });
        registry.add(&Subscription::PriceHistory {
            orderbook_id: "ob1".to_string(),
            resolution: Resolution::FiveMinutes,
            include_ohlcv: true,
        });
        registry.add(&Subscription::Market { market_pubkey: "all".to_string() });

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 5);
        assert_eq!(
            snapshot[0],
            Subscription::BookUpdate { orderbook_ids: ids(&["ob1", "ob2"]) }
        );
        assert_eq!(snapshot[2], Subscription::User { user: "alice".to_string() });

        registry.clear();
        assert!(registry.snapshot().is_empty());
        assert!(!registry.has_subscriptions());
    }

    #[test]
    fn test_validation() {
        assert!(Subscription::BookUpdate { orderbook_ids: vec![] }.validate().is_err());
        assert!(Subscription::Trades { orderbook_ids: ids(&["ob1", " "]) }.validate().is_err());
        assert!(Subscription::User { user: String::new() }.validate().is_err());
        assert!(Subscription::Market { market_pubkey: "all".to_string() }.validate().is_ok());
        assert!(matches!(
            Subscription::PriceHistory {
                orderbook_id: "".to_string(),
                resolution: Resolution::OneDay,
                include_ohlcv: false
            }
            .validate(),
            Err(WebSocketError::InvalidSubscription(_))
        ));
    }

    #[test]
    fn test_to_params() {
        let sub = Subscription::PriceHistory {
            orderbook_id: "ob1".to_string(),
            resolution: Resolution::OneHour,
            include_ohlcv: true,
        };
        assert_eq!(
            sub.to_params(),
            SubscribeParams::price_history("ob1".to_string(), Resolution::OneHour, true)
        );
        assert_eq!(sub.subscription_type(), "price_history");
    }
}

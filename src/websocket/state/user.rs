//! User state management.
//!
//! Maintains local state for the subscribed user's open orders and balances.

use std::collections::{BTreeMap, HashMap};

use crate::shared::{is_zero_str, parse_decimal};
use crate::websocket::types::{
    BalanceEntry, Order, OrderUpdate, OutcomeBalance, UserEventData, UserEventType,
};

/// Balance map key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BalanceKey {
    pub market_pubkey: String,
    pub deposit_mint: String,
}

impl BalanceKey {
    pub fn new(market_pubkey: impl Into<String>, deposit_mint: impl Into<String>) -> Self {
        Self {
            market_pubkey: market_pubkey.into(),
            deposit_mint: deposit_mint.into(),
        }
    }
}

/// What a balance merge did
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceMerge {
    /// Written under the exact (market, deposit mint) key
    Upserted(BalanceKey),
    /// No deposit mint given; the market's only entry was replaced
    MatchedByMarket(BalanceKey),
    /// No deposit mint given and the market has several entries; nothing written
    Ambiguous { market_pubkey: String, candidates: usize },
    /// No deposit mint given and nothing is known under the market
    Unmatched { market_pubkey: String },
    /// No market given
    Skipped,
}

/// User state tracking orders and balances
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserState {
    /// User public key
    pub user: String,
    orders: HashMap<String, Order>,
    balances: BTreeMap<BalanceKey, BalanceEntry>,
    has_snapshot: bool,
    last_timestamp: Option<String>,
}

impl UserState {
    pub fn new(user: String) -> Self {
        Self {
            user,
            ..Self::default()
        }
    }

    /// Replace orders and balances wholesale
    pub fn apply_snapshot(&mut self, data: &UserEventData) {
        self.orders = data
            .orders
            .iter()
            .map(|o| (o.order_hash.clone(), o.clone()))
            .collect();
        self.balances = data
            .balances
            .values()
            .map(|b| {
                (
                    BalanceKey::new(b.market_pubkey.clone(), b.deposit_mint.clone()),
                    b.clone(),
                )
            })
            .collect();

        self.has_snapshot = true;
        self.last_timestamp = data.timestamp.clone();
    }

    /// Apply an order update
    ///
    /// Exactly-zero `remaining` deletes the order. Otherwise an existing order
    /// is updated in place; an unknown hash is only inserted when the event
    /// names both the market and the orderbook.
    pub fn apply_order_update(&mut self, data: &UserEventData) {
        if let Some(update) = &data.order {
            self.upsert_order(data, update);

            if let Some(balance) = &update.balance {
                self.apply_balance(data, &balance.outcomes);
            }
        }

        self.last_timestamp = data.timestamp.clone();
    }

    fn upsert_order(&mut self, data: &UserEventData, update: &OrderUpdate) {
        let order_hash = &update.order_hash;

        if is_zero_str(&update.remaining) {
            self.orders.remove(order_hash);
        } else if let Some(existing) = self.orders.get_mut(order_hash) {
            existing.remaining = update.remaining.clone();
            existing.filled = update.filled.clone();
        } else if let (Some(market_pubkey), Some(orderbook_id)) =
            (&data.market_pubkey, &data.orderbook_id)
        {
            let remaining = parse_decimal(&update.remaining);
            let filled = parse_decimal(&update.filled);
            let maker_amount = match (remaining, filled) {
                (Some(remaining), Some(filled)) => remaining
                    .checked_add(filled)
                    .map(|total| total.to_string())
                    .unwrap_or_else(|| update.remaining.clone()),
                _ => update.remaining.clone(),
            };
            let order = Order {
                order_hash: order_hash.clone(),
                market_pubkey: market_pubkey.clone(),
                orderbook_id: orderbook_id.clone(),
                side: update.side,
                maker_amount,
                taker_amount: "0".to_string(),
                remaining: update.remaining.clone(),
                filled: update.filled.clone(),
                price: update.price.clone(),
                created_at: update.created_at,
                expiration: 0,
            };
            self.orders.insert(order_hash.clone(), order);
        } else {
            tracing::debug!(
                order_hash = %order_hash,
                "order update for unknown order without market context"
            );
        }
    }

    /// Apply a standalone balance update
    pub fn apply_balance_update(&mut self, data: &UserEventData) {
        if let Some(balance) = &data.balance {
            self.apply_balance(data, &balance.outcomes);
        }

        self.last_timestamp = data.timestamp.clone();
    }

    fn apply_balance(&mut self, data: &UserEventData, outcomes: &[OutcomeBalance]) {
        let merge = self.merge_balance(
            data.market_pubkey.as_deref(),
            data.deposit_mint.as_deref(),
            outcomes,
        );
        match &merge {
            BalanceMerge::Unmatched { market_pubkey } => {
                tracing::debug!(
                    user = %self.user,
                    market_pubkey = %market_pubkey,
                    "balance update without deposit mint for unknown market; skipped"
                );
            }
            BalanceMerge::Skipped => {
                tracing::debug!(user = %self.user, "balance update without market; skipped");
            }
            BalanceMerge::Upserted(_)
            | BalanceMerge::MatchedByMarket(_)
            | BalanceMerge::Ambiguous { .. } => {}
        }
    }

    /// Replace the outcome array of one balance entry.
    ///
    /// Without a deposit mint the entry is resolved by market alone, which is
    /// only done when the market has exactly one entry.
    pub fn merge_balance(
        &mut self,
        market_pubkey: Option<&str>,
        deposit_mint: Option<&str>,
        outcomes: &[OutcomeBalance],
    ) -> BalanceMerge {
        let Some(market_pubkey) = market_pubkey else {
            return BalanceMerge::Skipped;
        };

        if let Some(deposit_mint) = deposit_mint {
            let key = BalanceKey::new(market_pubkey, deposit_mint);
            self.balances.insert(
                key.clone(),
                BalanceEntry {
                    market_pubkey: market_pubkey.to_string(),
                    deposit_mint: deposit_mint.to_string(),
                    outcomes: outcomes.to_vec(),
                },
            );
            return BalanceMerge::Upserted(key);
        }

        let mut candidates = self
            .balances
            .iter_mut()
            .filter(|(k, _)| k.market_pubkey == market_pubkey);
        match (candidates.next(), candidates.next()) {
            (Some((key, entry)), None) => {
                entry.outcomes = outcomes.to_vec();
                BalanceMerge::MatchedByMarket(key.clone())
            }
            (None, _) => BalanceMerge::Unmatched {
                market_pubkey: market_pubkey.to_string(),
            },
            (Some(_), Some(_)) => {
                let candidates = 2 + candidates.count();
                tracing::warn!(
                    market_pubkey,
                    candidates,
                    "balance update without deposit mint matches several entries; skipped"
                );
                BalanceMerge::Ambiguous {
                    market_pubkey: market_pubkey.to_string(),
                    candidates,
                }
            }
        }
    }

    /// Apply any user event
    pub fn apply_event(&mut self, data: &UserEventData) {
        match data.event_type {
            UserEventType::Snapshot => self.apply_snapshot(data),
            UserEventType::OrderUpdate => self.apply_order_update(data),
            UserEventType::BalanceUpdate => self.apply_balance_update(data),
            UserEventType::Unknown => {
                tracing::warn!(user = %self.user, "unknown user event type");
            }
        }
    }

    pub fn get_order(&self, order_hash: &str) -> Option<&Order> {
        self.orders.get(order_hash)
    }

    /// Open orders, oldest first
    pub fn open_orders(&self) -> Vec<&Order> {
        self.filtered_orders(|_| true)
    }

    pub fn orders_for_market(&self, market_pubkey: &str) -> Vec<&Order> {
        self.filtered_orders(|o| o.market_pubkey == market_pubkey)
    }

    pub fn orders_for_orderbook(&self, orderbook_id: &str) -> Vec<&Order> {
        self.filtered_orders(|o| o.orderbook_id == orderbook_id)
    }

    fn filtered_orders(&self, keep: impl Fn(&Order) -> bool) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self.orders.values().filter(|o| keep(o)).collect();
        orders.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_hash.cmp(&b.order_hash))
        });
        orders
    }

    pub fn get_balance(&self, market_pubkey: &str, deposit_mint: &str) -> Option<&BalanceEntry> {
        self.balances.get(&BalanceKey::new(market_pubkey, deposit_mint))
    }

    pub fn balances(&self) -> impl Iterator<Item = &BalanceEntry> {
        self.balances.values()
    }

    fn outcome(
        &self,
        market_pubkey: &str,
        deposit_mint: &str,
        outcome_index: i32,
    ) -> Option<&OutcomeBalance> {
        self.get_balance(market_pubkey, deposit_mint)
            .and_then(|b| b.outcomes.iter().find(|o| o.outcome_index == outcome_index))
    }

    /// Idle balance for one outcome
    pub fn idle_balance_for_outcome(
        &self,
        market_pubkey: &str,
        deposit_mint: &str,
        outcome_index: i32,
    ) -> Option<String> {
        self.outcome(market_pubkey, deposit_mint, outcome_index)
            .map(|o| o.idle.clone())
    }

    /// On-book balance for one outcome
    pub fn on_book_balance_for_outcome(
        &self,
        market_pubkey: &str,
        deposit_mint: &str,
        outcome_index: i32,
    ) -> Option<String> {
        self.outcome(market_pubkey, deposit_mint, outcome_index)
            .map(|o| o.on_book.clone())
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    pub fn last_timestamp(&self) -> Option<&str> {
        self.last_timestamp.as_deref()
    }

    /// Clear the user state (for disconnect/resync)
    pub fn clear(&mut self) {
        self.orders.clear();
        self.balances.clear();
        self.has_snapshot = false;
        self.last_timestamp = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::types::Balance;

    fn outcome(index: i32, idle: &str, on_book: &str) -> OutcomeBalance {
        OutcomeBalance {
            outcome_index: index,
            mint: format!("mint{}", index),
            idle: idle.to_string(),
            on_book: on_book.to_string(),
        }
    }

    fn order(hash: &str, created_at: i64) -> Order {
        Order {
            order_hash: hash.to_string(),
            market_pubkey: "market1".to_string(),
            orderbook_id: "ob1".to_string(),
            side: 0,
            maker_amount: "10".to_string(),
            taker_amount: "5".to_string(),
            remaining: "10".to_string(),
            filled: "0".to_string(),
            price: "0.5".to_string(),
            created_at,
            expiration: 0,
        }
    }

    fn event(event_type: UserEventType) -> UserEventData {
        UserEventData {
            event_type,
            orders: Vec::new(),
            balances: HashMap::new(),
            order: None,
            balance: None,
            market_pubkey: None,
            orderbook_id: None,
            deposit_mint: None,
            timestamp: None,
        }
    }

    fn order_update(hash: &str, remaining: &str, filled: &str) -> UserEventData {
        let mut data = event(UserEventType::OrderUpdate);
        data.order = Some(OrderUpdate {
            order_hash: hash.to_string(),
            price: "0.5".to_string(),
            fill_amount: "1".to_string(),
            remaining: remaining.to_string(),
            filled: filled.to_string(),
            side: 0,
            is_maker: true,
            created_at: 7,
            balance: None,
        });
        data
    }

    fn snapshot_state() -> UserState {
        let mut data = event(UserEventType::Snapshot);
        data.orders = vec![order("h1", 2), order("h2", 1)];
        data.balances.insert(
            "market1:usdc".to_string(),
            BalanceEntry {
                market_pubkey: "market1".to_string(),
                deposit_mint: "usdc".to_string(),
                outcomes: vec![outcome(0, "100", "5"), outcome(1, "50", "0")],
            },
        );
        let mut state = UserState::new("alice".to_string());
        state.apply_event(&data);
        state
    }

    #[test]
    fn test_snapshot() {
        let state = snapshot_state();
        assert!(state.has_snapshot());
        assert_eq!(state.order_count(), 2);
        let hashes: Vec<_> = state.open_orders().iter().map(|o| o.order_hash.as_str()).collect();
        assert_eq!(hashes, vec!["h2", "h1"]);
        assert_eq!(state.idle_balance_for_outcome("market1", "usdc", 0).as_deref(), Some("100"));
        assert_eq!(state.on_book_balance_for_outcome("market1", "usdc", 0).as_deref(), Some("5"));
        assert_eq!(state.idle_balance_for_outcome("market1", "usdc", 3), None);
    }

    #[test]
    fn test_zero_remaining_deletes_order() {
        let mut state = snapshot_state();
        state.apply_event(&order_update("h1", "0.000", "10"));
        assert!(state.get_order("h1").is_none());
        assert_eq!(state.order_count(), 1);
    }

    #[test]
    fn test_existing_order_is_mutated() {
        let mut state = snapshot_state();
        state.apply_event(&order_update("h1", "4", "6"));
        let order = state.get_order("h1").unwrap();
        assert_eq!(order.remaining, "4");
        assert_eq!(order.filled, "6");
        assert_eq!(order.maker_amount, "10");
    }

    #[test]
    fn test_unknown_order_needs_context() {
        let mut state = snapshot_state();
        state.apply_event(&order_update("h3", "3", "1"));
        assert!(state.get_order("h3").is_none());

        let mut data = order_update("h3", "3", "1");
        data.market_pubkey = Some("market2".to_string());
        data.orderbook_id = Some("ob2".to_string());
        state.apply_event(&data);

        let order = state.get_order("h3").unwrap();
        assert_eq!(order.maker_amount, "4");
        assert_eq!(order.taker_amount, "0");
        assert_eq!(state.orders_for_market("market2").len(), 1);
        assert_eq!(state.orders_for_orderbook("ob1").len(), 2);
    }

    #[test]
    fn test_inline_balance_uses_balance_path() {
        let mut state = snapshot_state();
        let mut data = order_update("h1", "9", "1");
        data.market_pubkey = Some("market1".to_string());
        data.deposit_mint = Some("usdc".to_string());
        if let Some(update) = data.order.as_mut() {
            update.balance = Some(Balance {
                outcomes: vec![outcome(0, "90", "15")],
            });
        }
        state.apply_event(&data);
        assert_eq!(state.idle_balance_for_outcome("market1", "usdc", 0).as_deref(), Some("90"));
        assert_eq!(state.idle_balance_for_outcome("market1", "usdc", 1), None);
    }

    #[test]
    fn test_balance_update_upserts_by_key() {
        let mut state = snapshot_state();
        let mut data = event(UserEventType::BalanceUpdate);
        data.market_pubkey = Some("market1".to_string());
        data.deposit_mint = Some("sol".to_string());
        data.balance = Some(Balance {
            outcomes: vec![outcome(0, "1", "0")],
        });
        state.apply_event(&data);

        assert_eq!(state.balances().count(), 2);
        assert_eq!(state.idle_balance_for_outcome("market1", "sol", 0).as_deref(), Some("1"));
        assert_eq!(state.idle_balance_for_outcome("market1", "usdc", 0).as_deref(), Some("100"));
    }

    #[test]
    fn test_market_only_balance_fallback() {
        let mut state = snapshot_state();
        let merged = state.merge_balance(Some("market1"), None, &[outcome(0, "7", "0")]);
        assert_eq!(merged, BalanceMerge::MatchedByMarket(BalanceKey::new("market1", "usdc")));
        assert_eq!(state.idle_balance_for_outcome("market1", "usdc", 0).as_deref(), Some("7"));

        assert_eq!(
            state.merge_balance(Some("market1"), Some("sol"), &[outcome(0, "1", "0")]),
            BalanceMerge::Upserted(BalanceKey::new("market1", "sol"))
        );
        let before = state.clone();
        let merged = state.merge_balance(Some("market1"), None, &[outcome(0, "999", "0")]);
        assert_eq!(
            merged,
            BalanceMerge::Ambiguous {
                market_pubkey: "market1".to_string(),
                candidates: 2
            }
        );
        assert_eq!(state, before);

        assert_eq!(
            state.merge_balance(Some("market9"), None, &[]),
            BalanceMerge::Unmatched {
                market_pubkey: "market9".to_string()
            }
        );
        assert_eq!(state.merge_balance(None, Some("usdc"), &[]), BalanceMerge::Skipped);
    }

    #[test]
    fn test_balance_update_for_unknown_market_only_moves_timestamp() {
        let mut state = snapshot_state();
        let before_balances: Vec<_> = state.balances().cloned().collect();

        let mut data = event(UserEventType::BalanceUpdate);
        data.market_pubkey = Some("market9".to_string());
        data.timestamp = Some("2024-01-01T00:00:05.000Z".to_string());
        data.balance = Some(Balance {
            outcomes: vec![outcome(0, "3", "0")],
        });
        state.apply_event(&data);

        data.market_pubkey = None;
        data.timestamp = Some("2024-01-01T00:00:06.000Z".to_string());
        state.apply_event(&data);

        let after_balances: Vec<_> = state.balances().cloned().collect();
        assert_eq!(after_balances, before_balances);
        assert_eq!(state.last_timestamp(), Some("2024-01-01T00:00:06.000Z"));
    }

    #[test]
    fn test_new_order_maker_amount_tolerates_overflow() {
        let mut state = UserState::new("alice".to_string());
        let mut data = order_update(
            "h9",
            "79228162514264337593543950335",
            "79228162514264337593543950335",
        );
        data.market_pubkey = Some("market1".to_string());
        data.orderbook_id = Some("ob1".to_string());
        state.apply_event(&data);

        let order = state.get_order("h9").unwrap();
        assert_eq!(order.maker_amount, "79228162514264337593543950335");
    }

    #[test]
    fn test_clear() {
        let mut state = snapshot_state();
        state.clear();
        assert_eq!(state.order_count(), 0);
        assert_eq!(state.balances().count(), 0);
        assert!(!state.has_snapshot());
        assert_eq!(state.user, "alice");
    }
}

//! # Lightcone WebSocket Rust SDK
//!
//! Real-time sync client for the Lightcone streaming API. It keeps local
//! mirrors of orderbooks, price-history candles and one user's orders and
//! balances consistent through drops, gaps and reconnects.
//!
//! ## Modules
//!
//! - [`websocket`]: connection manager, subscriptions, dispatcher and replicas
//! - [`shared`]: candle resolutions and exact-decimal helpers
//! - [`network`]: default endpoint URLs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lightcone_ws::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WebSocketError> {
//!     let client = WsClient::new(WebSocketConfig::default());
//!     client.connect_default().await?;
//!     client
//!         .subscribe_price_history("ob_1".to_string(), Resolution::OneMinute, true)
//!         .await?;
//!
//!     while let Some(event) = client.next_event().await {
//!         if let WsEvent::PriceUpdate { orderbook_id, resolution } = event {
//!             let history = client.get_price_history(&orderbook_id, resolution).await;
//!             println!("{:?}", history.and_then(|h| h.current_midpoint()));
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULES
// ============================================================================

/// Shared utilities and types.
pub mod shared;

/// Network URL constants.
pub mod network;

/// WebSocket client module for real-time data streaming.
pub mod websocket;

// ============================================================================
// PRELUDE
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use lightcone_ws::prelude::*;
/// ```
pub mod prelude {
    pub use crate::network::{DEFAULT_WS_URL, LOCAL_WS_URL};

    pub use crate::shared::{format_fixed, is_zero_str, parse_decimal, Resolution};

    pub use crate::websocket::{
        BookUpdateData, Candle, ConnectionPhase, LocalOrderbook, MarketEventData,
        MarketEventType, Order, PriceHistory, PriceHistoryData, PriceLevel, Subscription,
        TradeData, UserEventData, UserEventType, UserState, WebSocketConfig, WebSocketError,
        WsClient, WsClientBuilder, WsEvent, WsResult, ALL_MARKETS,
    };
}

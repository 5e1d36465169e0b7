//! WebSocket sync client for Lightcone.
//!
//! Streams live orderbook updates, trades, candles, market events and the
//! authenticated user's orders and balances, and keeps local replicas of
//! that state consistent across drops and reconnects.
//!
//! # Example
//!
//! ```rust,ignore
//! use lightcone_ws::websocket::*;
//!
//! let client = WsClient::new(WebSocketConfig::default());
//! client.connect("wss://tws.lightcone.xyz/ws").await?;
//! client.subscribe_book_updates(vec!["ob_1".to_string()]).await?;
//!
//! while let Some(event) = client.next_event().await {
//!     match event {
//!         WsEvent::BookUpdate { orderbook_id, .. } => {
//!             if let Some(book) = client.get_orderbook(&orderbook_id).await {
//!                 println!("spread: {:?}", book.spread());
//!             }
//!         }
//!         WsEvent::ResyncRequired { orderbook_id } => {
//!             client.subscribe_book_updates(vec![orderbook_id]).await?;
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod liveness;
pub mod queue;
pub mod reconnect;
pub mod state;
pub mod subscriptions;
pub mod timing;
pub mod transport;
pub mod types;

pub use client::{WsClient, WsClientBuilder};
pub use config::WebSocketConfig;
pub use error::{ErrorCategory, WebSocketError, WsResult};
pub use handlers::MessageDispatcher;
pub use liveness::{Liveness, LivenessAction};
pub use queue::{event_queue, EventReceiver, EventSender, DEFAULT_QUEUE_CAPACITY};
pub use reconnect::{ConnectionPhase, ConnectionState, ReconnectPolicy};
pub use state::{
    BalanceKey, BalanceMerge, LocalOrderbook, PriceHistory, PriceHistoryKey, UserState,
    MAX_CANDLES,
};
pub use subscriptions::{Subscription, SubscriptionRegistry, ALL_MARKETS};
pub use timing::{
    FixedJitter, JitterSource, RandomJitter, SharedJitter, SharedTimer, Timer, TokioTimer,
};
pub use transport::{
    CloseInfo, ConnectRequest, Connection, Connector, Endpoint, Frame, FrameSink, FrameStream,
    TungsteniteConnector,
};
pub use types::{
    Balance, BalanceEntry, BookUpdateData, Candle, ErrorCode, ErrorData, MarketEventData,
    MarketEventType, MessageType, Order, OrderUpdate, OutcomeBalance, PriceEventType,
    PriceHistoryData, PriceLevel, RawWsMessage, RequestMethod, SubscribeParams, TradeData,
    UserEventData, UserEventType, WsEvent, WsRequest,
};

//! Connection manager and public client.
//!
//! [`WsClient`] owns one logical connection. `connect` dials, replays the
//! subscription registry and spawns a background receive task. That task is
//! the only writer of the replicas and the event queue producer; it runs the
//! liveness watchdog and, when the link drops, the reconnect loop.
//!
//! Outbound frames from the public API and from the receive task share one
//! sink behind a `tokio::sync::Mutex`, so whole frames never interleave.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::network::DEFAULT_WS_URL;
use crate::shared::Resolution;
use crate::websocket::config::WebSocketConfig;
use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::handlers::{MessageDispatcher, SharedDispatcher};
use crate::websocket::liveness::{Liveness, LivenessAction};
use crate::websocket::queue::{event_queue, EventReceiver, EventSender};
use crate::websocket::reconnect::{
    lock_state, ConnectionPhase, ConnectionState, SharedConnectionState,
};
use crate::websocket::state::{LocalOrderbook, PriceHistory, UserState};
use crate::websocket::subscriptions::{SharedRegistry, Subscription, SubscriptionRegistry};
use crate::websocket::timing::{with_timeout, RandomJitter, SharedJitter, SharedTimer, TokioTimer};
use crate::websocket::transport::{
    CloseInfo, ConnectRequest, Connection, Connector, Endpoint, Frame, FrameSink, FrameStream,
    TungsteniteConnector, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION,
};
use crate::websocket::types::{WsEvent, WsRequest};

/// Why the receive loop gave up on a link
#[derive(Debug)]
enum LinkLost {
    Closed { code: u16, reason: String },
    RateLimited { reason: String },
    PingTimeout,
    Failed(WebSocketError),
}

impl LinkLost {
    fn reason(&self) -> String {
        match self {
            LinkLost::Closed { code, reason } => format!("code: {}, reason: {}", code, reason),
            LinkLost::RateLimited { reason } => {
                format!("code: {}, reason: {}", CLOSE_POLICY_VIOLATION, reason)
            }
            LinkLost::PingTimeout => "Ping timeout".to_string(),
            LinkLost::Failed(e) => e.to_string(),
        }
    }
}

/// State shared between the client handle and its receive task
struct Inner {
    config: WebSocketConfig,
    connector: Arc<dyn Connector>,
    timer: SharedTimer,
    jitter: SharedJitter,
    state: SharedConnectionState,
    sink: tokio::sync::Mutex<Option<FrameSink>>,
    registry: SharedRegistry,
    dispatcher: SharedDispatcher,
    events: EventSender<WsEvent>,
    endpoint: Mutex<Option<Endpoint>>,
}

impl Inner {
    fn phase(&self) -> ConnectionPhase {
        lock_state(&self.state).phase()
    }

    fn is_current(&self, generation: u64) -> bool {
        lock_state(&self.state).generation() == generation
    }

    fn emit(&self, event: WsEvent) {
        if let Some(evicted) = self.events.push(event) {
            tracing::warn!(
                dropped = self.events.dropped(),
                evicted = ?std::mem::discriminant(&evicted),
                "event queue full, dropped oldest event"
            );
        }
    }

    async fn dial(&self, request: &ConnectRequest) -> WsResult<Connection> {
        let timeout = self.config.connect_timeout();
        with_timeout(self.timer.as_ref(), timeout, self.connector.connect(request))
            .await
            .unwrap_or_else(|| {
                Err(WebSocketError::OperationTimeout(format!(
                    "connect to {} timed out after {:?}",
                    request.endpoint, timeout
                )))
            })
    }

    /// Publish a fresh sink and move to Connected, unless `generation` was fenced off.
    async fn install_link(&self, generation: u64, sink: FrameSink) -> bool {
        let mut slot = self.sink.lock().await;
        let accepted = lock_state(&self.state).connected(generation);
        if accepted {
            *slot = Some(sink);
        }
        accepted
    }

    async fn drop_link(&self) {
        self.sink.lock().await.take();
    }

    async fn send_frame(&self, frame: Frame) -> WsResult<()> {
        let mut slot = self.sink.lock().await;
        let sink = slot.as_mut().ok_or(WebSocketError::NotConnected)?;
        sink.send(frame).await.map_err(|e| match e {
            WebSocketError::SendFailed(_) => e,
            other => WebSocketError::SendFailed(other.to_string()),
        })
    }

    async fn send_request(&self, request: &WsRequest) -> WsResult<()> {
        self.send_frame(Frame::Text(request.to_json()?)).await
    }

    /// Send a subscription change. While a reconnect is pending the registry
    /// already carries the change, so a missing link is not an error.
    async fn deliver(&self, request: &WsRequest) -> WsResult<()> {
        match self.send_request(request).await {
            Err(WebSocketError::NotConnected) if self.phase().is_active() => {
                tracing::debug!("no live link, request deferred to resubscription");
                Ok(())
            }
            other => other,
        }
    }

    async fn send_ping(&self) -> WsResult<()> {
        let timeout = self.config.ping_timeout();
        with_timeout(self.timer.as_ref(), timeout, self.send_request(&WsRequest::ping()))
            .await
            .unwrap_or_else(|| {
                Err(WebSocketError::OperationTimeout(format!(
                    "ping not written within {:?}",
                    timeout
                )))
            })
    }

    async fn resubscribe_all(&self) {
        let subscriptions = self.registry.read().await.snapshot();
        let count = subscriptions.len();
        for subscription in subscriptions {
            let request = WsRequest::subscribe(subscription.to_params());
            if let Err(e) = self.send_request(&request).await {
                tracing::warn!(
                    topic = subscription.subscription_type(),
                    error = %e,
                    "failed to resubscribe"
                );
            }
        }
        if count > 0 {
            tracing::info!(count, "replayed subscriptions");
        }
    }

    async fn dispatch(&self, text: &str) -> Vec<WsEvent> {
        let registry = self.registry.read().await;
        let mut dispatcher = self.dispatcher.write().await;
        dispatcher.handle(text, &registry)
    }

    /// Read one link until it is lost, answering pings and running the watchdog.
    async fn read_until_lost(&self, stream: &mut FrameStream) -> LinkLost {
        let mut liveness = Liveness::new(
            self.timer.now(),
            self.config.ping_interval(),
            self.config.pong_timeout(),
        );

        loop {
            let wait = liveness
                .next_deadline()
                .saturating_duration_since(self.timer.now());

            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = self.timer.sleep(wait) => {
                    match liveness.poll(self.timer.now()) {
                        LivenessAction::Dead => return LinkLost::PingTimeout,
                        LivenessAction::SendPing => {
                            let sent_at = self.timer.now();
                            if let Err(e) = self.send_ping().await {
                                tracing::warn!(error = %e, "failed to send ping");
                                return LinkLost::Failed(e);
                            }
                            liveness.on_ping_sent(sent_at);
                        }
                        LivenessAction::Idle => {}
                    }
                    continue;
                }
            };

            match frame {
                Some(Ok(Frame::Text(text))) => {
                    for event in self.dispatch(&text).await {
                        if matches!(event, WsEvent::Pong) {
                            liveness.on_pong(self.timer.now());
                        }
                        self.emit(event);
                    }
                }
                Some(Ok(Frame::Ping(data))) => {
                    if let Err(e) = self.send_frame(Frame::Pong(data)).await {
                        tracing::warn!(error = %e, "failed to answer transport ping");
                    }
                }
                Some(Ok(Frame::Pong(_))) => liveness.on_pong(self.timer.now()),
                Some(Ok(Frame::Binary(data))) => {
                    tracing::debug!(len = data.len(), "ignoring binary frame");
                }
                Some(Ok(Frame::Close(info))) => {
                    let (code, reason) = CloseInfo::from_frame(info.as_ref());
                    tracing::info!(code, %reason, "server closed connection");
                    return if code == CLOSE_POLICY_VIOLATION {
                        LinkLost::RateLimited { reason }
                    } else {
                        LinkLost::Closed { code, reason }
                    };
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "WebSocket error");
                    return LinkLost::Failed(e);
                }
                None => {
                    return LinkLost::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: "Stream ended".to_string(),
                    };
                }
            }
        }
    }

    fn give_up(&self, generation: u64) {
        let stopped = lock_state(&self.state).terminal(generation);
        if stopped {
            self.events.stop();
        }
    }

    /// Retry until a link is back or the policy is exhausted.
    async fn reconnect(&self, generation: u64, request: &ConnectRequest) -> Option<FrameStream> {
        let policy = self.config.reconnect_policy();
        let mut attempt = 0u32;

        loop {
            let Some(delay) = policy.delay(attempt, self.jitter.as_ref()) else {
                tracing::warn!(attempts = attempt, "reconnect attempts exhausted");
                self.give_up(generation);
                return None;
            };
            attempt += 1;

            let scheduled = lock_state(&self.state).reconnecting(generation, attempt);
            if !scheduled {
                return None;
            }
            self.emit(WsEvent::Reconnecting { attempt });
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                endpoint = %request.endpoint,
                "reconnecting"
            );
            self.timer.sleep(delay).await;

            match self.dial(request).await {
                Ok(Connection { sink, stream }) => {
                    if !self.install_link(generation, sink).await {
                        return None;
                    }
                    self.resubscribe_all().await;
                    self.emit(WsEvent::Connected);
                    return Some(stream);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    if !self.is_current(generation) {
                        return None;
                    }
                    let fatal = e.is_fatal();
                    self.emit(WsEvent::error(e));
                    if fatal {
                        self.give_up(generation);
                        return None;
                    }
                }
            }
        }
    }
}

/// Background receive task: one per successful `connect`.
async fn run_connection(
    inner: Arc<Inner>,
    generation: u64,
    request: ConnectRequest,
    mut stream: FrameStream,
) {
    loop {
        let lost = inner.read_until_lost(&mut stream).await;
        if !inner.is_current(generation) {
            return;
        }

        inner.drop_link().await;
        inner.dispatcher.write().await.clear_all();

        match lost {
            LinkLost::RateLimited { .. } => {
                tracing::error!(code = CLOSE_POLICY_VIOLATION, "rate limited, not reconnecting");
                inner.emit(WsEvent::error(WebSocketError::RateLimited));
                inner.emit(WsEvent::Disconnected { reason: lost.reason() });
                inner.give_up(generation);
                return;
            }
            LinkLost::PingTimeout => {
                tracing::warn!(
                    pong_timeout_ms = inner.config.pong_timeout_ms,
                    "no pong within timeout"
                );
                inner.emit(WsEvent::error(WebSocketError::PingTimeout));
                inner.emit(WsEvent::Disconnected { reason: lost.reason() });
            }
            LinkLost::Closed { .. } | LinkLost::Failed(_) => {
                inner.emit(WsEvent::Disconnected { reason: lost.reason() });
            }
        }

        match inner.reconnect(generation, &request).await {
            Some(next) => stream = next,
            None => return,
        }
    }
}

/// Builder for [`WsClient`] with injectable transport, clock and jitter
pub struct WsClientBuilder {
    config: WebSocketConfig,
    connector: Option<Arc<dyn Connector>>,
    timer: Option<SharedTimer>,
    jitter: Option<SharedJitter>,
}

impl WsClientBuilder {
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn timer(mut self, timer: SharedTimer) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn jitter(mut self, jitter: SharedJitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn build(self) -> WsClient {
        let (events_tx, events_rx) = event_queue(self.config.event_queue_capacity);
        let inner = Inner {
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(TungsteniteConnector) as Arc<dyn Connector>),
            timer: self
                .timer
                .unwrap_or_else(|| Arc::new(TokioTimer) as SharedTimer),
            jitter: self
                .jitter
                .unwrap_or_else(|| Arc::new(RandomJitter) as SharedJitter),
            config: self.config,
            state: Arc::new(Mutex::new(ConnectionState::default())),
            sink: tokio::sync::Mutex::new(None),
            registry: SubscriptionRegistry::shared(),
            dispatcher: MessageDispatcher::shared(),
            events: events_tx,
            endpoint: Mutex::new(None),
        };
        WsClient {
            inner: Arc::new(inner),
            events: events_rx,
            task: Mutex::new(None),
        }
    }
}

/// Real-time sync client for the Lightcone WebSocket API.
///
/// ```rust,ignore
/// use lightcone_ws::prelude::*;
///
/// let client = WsClient::new(WebSocketConfig::default());
/// client.connect_default().await?;
/// client.subscribe_book_updates(vec!["ob_1".to_string()]).await?;
///
/// while let Some(event) = client.next_event().await {
///     if let WsEvent::BookUpdate { orderbook_id, .. } = event {
///         let book = client.get_orderbook(&orderbook_id).await;
///         println!("{:?}", book.and_then(|b| b.best_bid()));
///     }
/// }
/// ```
pub struct WsClient {
    inner: Arc<Inner>,
    events: EventReceiver<WsEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsClient {
    pub fn new(config: WebSocketConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: WebSocketConfig) -> WsClientBuilder {
        WsClientBuilder {
            config,
            connector: None,
            timer: None,
            jitter: None,
        }
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect to `endpoint` and start the background receive task.
    ///
    /// Fails with `AlreadyConnected` while a connection (or reconnect) is in
    /// progress. After a terminal failure a new `connect` starts over and
    /// replays every registered subscription.
    pub async fn connect(&self, endpoint: &str) -> WsResult<()> {
        let endpoint = Endpoint::parse(endpoint)?;
        if let Some(token) = &self.inner.config.auth_token {
            if token.trim().is_empty() {
                return Err(WebSocketError::AuthenticationFailed(
                    "auth token is empty".to_string(),
                ));
            }
        }

        let generation = lock_state(&self.inner.state).begin_connect()?;
        if let Some(stale) = self.take_task() {
            stale.abort();
        }

        let request = ConnectRequest {
            endpoint: endpoint.clone(),
            auth_token: self.inner.config.auth_token.clone(),
        };
        let Connection { sink, stream } = match self.inner.dial(&request).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(endpoint = %endpoint, error = %e, "connection failed");
                lock_state(&self.inner.state).connect_failed(generation);
                return Err(e);
            }
        };

        if !self.inner.install_link(generation, sink).await {
            return Err(WebSocketError::NotConnected);
        }
        *self
            .inner
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(endpoint);

        self.inner.events.resume();
        self.inner.resubscribe_all().await;
        self.inner.emit(WsEvent::Connected);

        let handle = tokio::spawn(run_connection(
            Arc::clone(&self.inner),
            generation,
            request,
            stream,
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Connect to [`DEFAULT_WS_URL`].
    pub async fn connect_default(&self) -> WsResult<()> {
        self.connect(DEFAULT_WS_URL).await
    }

    /// Close the connection and forget every subscription.
    ///
    /// Idempotent. The socket is closed before the receive task is cancelled.
    pub async fn disconnect(&self) -> WsResult<()> {
        let previous = lock_state(&self.inner.state).stop();
        let task = self.take_task();

        let sink = self.inner.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let close = async {
                sink.send(Frame::Close(Some(CloseInfo::new(CLOSE_NORMAL, "Client disconnect"))))
                    .await?;
                sink.close().await
            };
            let timeout = self.inner.config.close_timeout();
            match with_timeout(self.inner.timer.as_ref(), timeout, close).await {
                Some(Ok(())) => {}
                Some(Err(e)) => tracing::debug!(error = %e, "close handshake failed"),
                None => tracing::warn!(
                    close_timeout_ms = self.inner.config.close_timeout_ms,
                    "close handshake timed out"
                ),
            }
        }

        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        self.inner.dispatcher.write().await.clear_all();
        self.inner.registry.write().await.clear();

        if previous.is_active() {
            self.inner.emit(WsEvent::Disconnected {
                reason: "Client disconnect".to_string(),
            });
            tracing::info!(?previous, "disconnected");
        }
        self.inner.events.stop();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    async fn subscribe(&self, subscription: Subscription) -> WsResult<()> {
        subscription.validate()?;
        {
            let mut registry = self.inner.registry.write().await;
            let mut dispatcher = self.inner.dispatcher.write().await;
            match &subscription {
                Subscription::BookUpdate { orderbook_ids } => {
                    for id in orderbook_ids {
                        dispatcher.ensure_orderbook(id);
                    }
                }
                Subscription::User { user } => {
                    dispatcher.activate_user(user);
                }
                Subscription::PriceHistory {
                    orderbook_id,
                    resolution,
                    include_ohlcv,
                } => dispatcher.ensure_price_history(orderbook_id, *resolution, *include_ohlcv),
                Subscription::Trades { .. } | Subscription::Market { .. } => {}
            }
            if let Some(previous) = registry.add(&subscription) {
                tracing::info!(%previous, "replacing subscribed user");
            }
        }
        self.inner
            .deliver(&WsRequest::subscribe(subscription.to_params()))
            .await
    }

    async fn unsubscribe(&self, subscription: Subscription) -> WsResult<()> {
        subscription.validate()?;
        {
            let mut registry = self.inner.registry.write().await;
            registry.remove(&subscription);
            if let Subscription::User { user } = &subscription {
                self.inner.dispatcher.write().await.deactivate_user(user);
            }
        }
        self.inner
            .deliver(&WsRequest::unsubscribe(subscription.to_params()))
            .await
    }

    /// Subscribe to orderbook snapshots and deltas
    pub async fn subscribe_book_updates(&self, orderbook_ids: Vec<String>) -> WsResult<()> {
        self.subscribe(Subscription::BookUpdate { orderbook_ids }).await
    }

    pub async fn subscribe_trades(&self, orderbook_ids: Vec<String>) -> WsResult<()> {
        self.subscribe(Subscription::Trades { orderbook_ids }).await
    }

    /// Subscribe to one user's orders and balances. Replaces any previously
    /// subscribed user. Requires an auth token.
    pub async fn subscribe_user(&self, user: String) -> WsResult<()> {
        if self.inner.config.auth_token.is_none() {
            return Err(WebSocketError::AuthRequired);
        }
        self.subscribe(Subscription::User { user }).await
    }

    pub async fn subscribe_price_history(
        &self,
        orderbook_id: String,
        resolution: Resolution,
        include_ohlcv: bool,
    ) -> WsResult<()> {
        self.subscribe(Subscription::PriceHistory {
            orderbook_id,
            resolution,
            include_ohlcv,
        })
        .await
    }

    /// Subscribe to lifecycle events of one market, or of every market with
    /// [`ALL_MARKETS`](crate::websocket::subscriptions::ALL_MARKETS).
    pub async fn subscribe_market(&self, market_pubkey: String) -> WsResult<()> {
        self.subscribe(Subscription::Market { market_pubkey }).await
    }

    pub async fn unsubscribe_book_updates(&self, orderbook_ids: Vec<String>) -> WsResult<()> {
        self.unsubscribe(Subscription::BookUpdate { orderbook_ids }).await
    }

    pub async fn unsubscribe_trades(&self, orderbook_ids: Vec<String>) -> WsResult<()> {
        self.unsubscribe(Subscription::Trades { orderbook_ids }).await
    }

    pub async fn unsubscribe_user(&self, user: String) -> WsResult<()> {
        self.unsubscribe(Subscription::User { user }).await
    }

    pub async fn unsubscribe_price_history(
        &self,
        orderbook_id: String,
        resolution: Resolution,
    ) -> WsResult<()> {
        self.unsubscribe(Subscription::PriceHistory {
            orderbook_id,
            resolution,
            include_ohlcv: false,
        })
        .await
    }

    pub async fn unsubscribe_market(&self, market_pubkey: String) -> WsResult<()> {
        self.unsubscribe(Subscription::Market { market_pubkey }).await
    }

    /// Send an application-level ping
    pub async fn ping(&self) -> WsResult<()> {
        self.inner.send_ping().await
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub fn connection_phase(&self) -> ConnectionPhase {
        self.inner.phase()
    }

    pub fn is_connected(&self) -> bool {
        lock_state(&self.inner.state).is_connected()
    }

    pub async fn subscription_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    /// Copy of the desired subscriptions, in replay order
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.registry.read().await.snapshot()
    }

    pub async fn get_orderbook(&self, orderbook_id: &str) -> Option<LocalOrderbook> {
        self.inner.dispatcher.read().await.orderbook(orderbook_id).cloned()
    }

    pub async fn get_price_history(
        &self,
        orderbook_id: &str,
        resolution: Resolution,
    ) -> Option<PriceHistory> {
        self.inner
            .dispatcher
            .read()
            .await
            .price_history(orderbook_id, resolution)
            .cloned()
    }

    pub async fn get_user_state(&self) -> Option<UserState> {
        self.inner.dispatcher.read().await.user_state().cloned()
    }

    /// Endpoint of the last successful `connect`
    pub fn endpoint(&self) -> Option<String> {
        self.inner
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|e| e.as_str().to_string())
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Next event. `None` once the client has stopped and the queue is drained.
    pub async fn next_event(&self) -> Option<WsEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&self) -> Option<WsEvent> {
        self.events.try_recv()
    }

    /// Like [`next_event`](Self::next_event) but fails with `NotConnected`
    /// instead of returning `None`.
    pub async fn recv(&self) -> WsResult<WsEvent> {
        if let Some(event) = self.events.try_recv() {
            return Ok(event);
        }
        if !lock_state(&self.inner.state).is_running() {
            return Err(WebSocketError::NotConnected);
        }
        self.events.recv().await.ok_or(WebSocketError::NotConnected)
    }

    /// Stream of events, ending once the client has stopped and the queue is drained.
    pub fn events(&self) -> impl Stream<Item = WsEvent> + '_ {
        async_stream::stream! {
            while let Some(event) = self.events.recv().await {
                yield event;
            }
        }
    }

    /// Events evicted by queue overflow since the client was built
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        if let Some(task) = self.take_task() {
            task.abort();
        }
    }
}

//! Transport seam between the connection manager and the socket library.
//!
//! The manager speaks [`Frame`]s over a boxed sink/stream pair produced by a
//! [`Connector`]. [`TungsteniteConnector`] is the production implementation;
//! tests plug in in-memory connectors.

use futures_util::future::{self, BoxFuture};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Uri};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::error::{WebSocketError, WsResult};

/// Close code for policy violations; the server uses it for rate limiting.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code reported when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code and reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Code and reason of an optional close frame
    pub fn from_frame(frame: Option<&CloseInfo>) -> (u16, String) {
        frame
            .map(|f| (f.code, f.reason.clone()))
            .unwrap_or_else(|| (CLOSE_ABNORMAL, "No close frame".to_string()))
    }
}

/// One WebSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseInfo>),
}

impl Frame {
    fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
            Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
            Message::Ping(data) => Some(Frame::Ping(data.to_vec())),
            Message::Pong(data) => Some(Frame::Pong(data.to_vec())),
            Message::Close(frame) => Some(Frame::Close(frame.map(|f| CloseInfo {
                code: u16::from(f.code),
                reason: f.reason.as_str().to_owned(),
            }))),
            Message::Frame(_) => None,
        }
    }

    fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close(info) => Message::Close(info.map(|i| CloseFrame {
                code: CloseCode::from(i.code),
                reason: i.reason.into(),
            })),
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = WebSocketError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = WsResult<Frame>> + Send>>;

/// An established link, split into its write and read halves
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<Frame, Error = WebSocketError> + Send + 'static,
        R: Stream<Item = WsResult<Frame>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Validated `ws://` or `wss://` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    secure: bool,
}

impl Endpoint {
    pub fn parse(url: &str) -> WsResult<Self> {
        let uri: Uri = url
            .trim()
            .parse()
            .map_err(|e| WebSocketError::InvalidEndpoint(format!("{}: {}", url, e)))?;
        let secure = match uri.scheme_str() {
            Some("wss") => true,
            Some("ws") => false,
            Some(other) => {
                return Err(WebSocketError::InvalidEndpoint(format!(
                    "unsupported scheme {:?} in {}",
                    other, url
                )))
            }
            None => {
                return Err(WebSocketError::InvalidEndpoint(format!(
                    "missing scheme in {}",
                    url
                )))
            }
        };
        match uri.host() {
            Some(host) if !host.is_empty() => {}
            _ => return Err(WebSocketError::InvalidEndpoint(format!("missing host in {}", url))),
        }
        Ok(Self {
            url: url.trim().to_string(),
            secure,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Everything needed to dial
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub endpoint: Endpoint,
    /// Sent as the `auth_token` cookie
    pub auth_token: Option<String>,
}

/// Opens links. Called once per connect and once per reconnect attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, request: &'a ConnectRequest) -> BoxFuture<'a, WsResult<Connection>>;
}

/// [`Connector`] over tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect<'a>(&'a self, request: &'a ConnectRequest) -> BoxFuture<'a, WsResult<Connection>> {
        Box::pin(async move {
            let mut http_request = request
                .endpoint
                .as_str()
                .into_client_request()
                .map_err(WebSocketError::from_handshake)?;

            if let Some(token) = &request.auth_token {
                let cookie = HeaderValue::from_str(&format!("auth_token={}", token)).map_err(|e| {
                    WebSocketError::AuthenticationFailed(format!("invalid auth token: {}", e))
                })?;
                http_request.headers_mut().insert("Cookie", cookie);
            }

            let (ws_stream, _response) = tokio_tungstenite::connect_async(http_request)
                .await
                .map_err(WebSocketError::from_handshake)?;

            let (sink, source) = ws_stream.split();
            let sink = sink
                .sink_map_err(WebSocketError::from)
                .with(|frame: Frame| future::ready(Ok::<_, WebSocketError>(frame.into_message())));
            let stream = source.filter_map(|item| {
                future::ready(match item {
                    Ok(msg) => Frame::from_message(msg).map(Ok),
                    Err(e) => Some(Err(WebSocketError::from(e))),
                })
            });

            Ok(Connection::new(sink, stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_validation() {
        let endpoint = Endpoint::parse("wss://tws.lightcone.xyz/ws").unwrap();
        assert!(endpoint.is_secure());
        assert_eq!(endpoint.as_str(), "wss://tws.lightcone.xyz/ws");
        assert!(!Endpoint::parse("ws://localhost:8081/ws").unwrap().is_secure());

        for bad in ["", "localhost:8081", "https://api.lightcone.xyz", "ws://", "not a url"] {
            assert!(
                matches!(Endpoint::parse(bad), Err(WebSocketError::InvalidEndpoint(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_close_frame_extraction() {
        let info = CloseInfo::new(CLOSE_POLICY_VIOLATION, "rate limited");
        assert_eq!(
            CloseInfo::from_frame(Some(&info)),
            (1008, "rate limited".to_string())
        );
        assert_eq!(
            CloseInfo::from_frame(None),
            (1006, "No close frame".to_string())
        );
    }

    #[test]
    fn test_message_conversion() {
        let frame = Frame::Close(Some(CloseInfo::new(CLOSE_NORMAL, "bye")));
        let msg = frame.clone().into_message();
        assert_eq!(Frame::from_message(msg), Some(frame));

        let msg = Frame::Text("{\"method\":\"ping\"}".to_string()).into_message();
        assert!(msg.is_text());
    }
}

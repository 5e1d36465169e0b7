//! WebSocket error types.

use thiserror::Error;

use crate::websocket::types::ErrorCode;

/// Broad grouping of [`WebSocketError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Consistency,
    Liveness,
    Policy,
    Auth,
    Usage,
}

/// WebSocket-specific errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WebSocketError {
    /// Initial connection or handshake failure
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Unexpected connection close
    #[error("Connection closed unexpectedly: code {code}, reason: {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// Endpoint is not a ws:// or wss:// URL with a host
    #[error("Invalid WebSocket endpoint: {0}")]
    InvalidEndpoint(String),

    /// Send failed
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Not connected
    #[error("Not connected to WebSocket server")]
    NotConnected,

    /// Already connected or connecting
    #[error("Already connected to WebSocket server")]
    AlreadyConnected,

    /// A bounded operation did not finish in time
    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    /// JSON deserialization failure
    #[error("Failed to parse message: {0}")]
    MessageParseError(String),

    /// Well-formed frame with contents that cannot be applied
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Server returned an error
    #[error("Server error: {message} (code: {code})")]
    ServerError {
        code: String,
        message: String,
        orderbook_id: Option<String>,
    },

    /// Detected sequence gap in book updates
    #[error("Sequence gap detected: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },

    /// Local state for an orderbook can no longer be trusted
    #[error("Resync required for orderbook: {orderbook_id}")]
    ResyncRequired { orderbook_id: String },

    /// No pong within the pong timeout
    #[error("Ping timeout: no pong response received")]
    PingTimeout,

    /// Rate limited (close code 1008)
    #[error("Rate limited: too many connections from this IP")]
    RateLimited,

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Authentication required for user stream
    #[error("Authentication required for user stream")]
    AuthRequired,

    /// Empty or malformed subscription parameters
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),
}

impl WebSocketError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionFailed(_)
            | Self::ConnectionClosed { .. }
            | Self::InvalidEndpoint(_)
            | Self::SendFailed(_)
            | Self::NotConnected
            | Self::AlreadyConnected
            | Self::OperationTimeout(_) => ErrorCategory::Transport,
            Self::MessageParseError(_) | Self::ProtocolError(_) | Self::ServerError { .. } => {
                ErrorCategory::Protocol
            }
            Self::SequenceGap { .. } | Self::ResyncRequired { .. } => ErrorCategory::Consistency,
            Self::PingTimeout => ErrorCategory::Liveness,
            Self::RateLimited => ErrorCategory::Policy,
            Self::AuthenticationFailed(_) | Self::AuthRequired => ErrorCategory::Auth,
            Self::InvalidSubscription(_) => ErrorCategory::Usage,
        }
    }

    /// Closed code of a [`WebSocketError::ServerError`], `None` for other variants.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::ServerError { code, .. } => Some(ErrorCode::from(code.as_str())),
            _ => None,
        }
    }

    /// Errors after which the connection manager must not reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RateLimited | Self::AuthenticationFailed(_))
    }

    /// Map an error raised while dialing or during the opening handshake.
    pub fn from_handshake(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::Url(e) => WebSocketError::InvalidEndpoint(e.to_string()),
            Error::Http(resp) => {
                let status = resp.status();
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    WebSocketError::AuthenticationFailed(format!("handshake rejected: {}", status))
                } else {
                    WebSocketError::ConnectionFailed(format!("HTTP error: {}", status))
                }
            }
            other => WebSocketError::ConnectionFailed(other.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WebSocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed => WebSocketError::ConnectionClosed {
                code: 1000,
                reason: "Connection closed normally".to_string(),
            },
            Error::AlreadyClosed => WebSocketError::NotConnected,
            Error::Io(e) => WebSocketError::ConnectionClosed {
                code: 1006,
                reason: e.to_string(),
            },
            Error::Protocol(e) => WebSocketError::ProtocolError(e.to_string()),
            Error::Url(e) => WebSocketError::InvalidEndpoint(e.to_string()),
            Error::Http(resp) => {
                WebSocketError::ConnectionFailed(format!("HTTP error: {}", resp.status()))
            }
            Error::HttpFormat(e) => WebSocketError::ConnectionFailed(e.to_string()),
            other => WebSocketError::ProtocolError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WebSocketError {
    fn from(err: serde_json::Error) -> Self {
        WebSocketError::MessageParseError(err.to_string())
    }
}

/// Result type alias for WebSocket operations
pub type WsResult<T> = Result<T, WebSocketError>;

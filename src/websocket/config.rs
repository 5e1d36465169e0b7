//! Client configuration.

use std::time::Duration;

use super::queue::DEFAULT_QUEUE_CAPACITY;
use super::reconnect::ReconnectPolicy;

/// Configuration for the WebSocket client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Interval between client pings
    pub ping_interval_ms: u64,
    /// Bound on writing a single ping frame
    pub ping_timeout_ms: u64,
    /// How long a ping may stay unanswered before the link is declared dead
    pub pong_timeout_ms: u64,
    /// Bound on the close handshake in `disconnect`
    pub close_timeout_ms: u64,
    /// Bound on each connect and reconnect attempt
    pub connect_timeout_ms: u64,
    /// Consecutive failed reconnects before giving up (0 disables reconnect)
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff
    pub base_reconnect_delay_ms: u64,
    /// Maximum reconnect delay
    pub max_reconnect_delay_ms: u64,
    /// Capacity of the drop-oldest event queue
    pub event_queue_capacity: usize,
    /// Session token attached as the `auth_token` cookie
    pub auth_token: Option<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 30_000,
            ping_timeout_ms: 10_000,
            pong_timeout_ms: 60_000,
            close_timeout_ms: 5_000,
            connect_timeout_ms: 30_000,
            max_reconnect_attempts: 5,
            base_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            auth_token: None,
        }
    }
}

impl WebSocketConfig {
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.base_reconnect_delay_ms),
            max_delay: Duration::from_millis(self.max_reconnect_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.ping_timeout(), Duration::from_secs(10));
        assert_eq!(config.close_timeout(), Duration::from_secs(5));
        assert_eq!(config.event_queue_capacity, 1000);
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_reconnect_policy_from_config() {
        let config = WebSocketConfig {
            max_reconnect_attempts: 3,
            base_reconnect_delay_ms: 250,
            max_reconnect_delay_ms: 2_000,
            ..WebSocketConfig::default()
        }
        .with_auth_token("tok");
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.ceiling(4), Duration::from_millis(2_000));
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
    }
}

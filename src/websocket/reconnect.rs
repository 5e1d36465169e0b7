//! Connection phase state machine and reconnect backoff.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ok──▶ Connected ──link lost──▶ Reconnecting{n}
//!   ▲                   │                  ▲                         │
//!   │                 failed               └────────reconnected──────┤
//!   └──────────────────┘│                                            │
//!   disconnect()        ▼                                       exhausted / 1008
//!                      Idle                                          ▼
//!                                                                 Terminal
//! ```
//!
//! Every transition goes through [`ConnectionState`], which lives behind one
//! mutex shared by the client handle and its receive task. Each `connect`
//! bumps a generation counter; a receive task holding an older generation
//! can no longer change the phase.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::error::{WebSocketError, WsResult};
use super::timing::JitterSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Connected,
    /// `attempt` is 1-based
    Reconnecting { attempt: u32 },
    /// Gave up; only an explicit `connect` leaves this phase
    Terminal,
}

impl ConnectionPhase {
    /// A phase in which a receive task owns (or is re-establishing) the link.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting { .. })
    }
}

/// Connection flags guarded by a single lock
#[derive(Debug, Clone)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    running: bool,
    generation: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            running: false,
            generation: 0,
        }
    }
}

pub type SharedConnectionState = Arc<Mutex<ConnectionState>>;

pub(crate) fn lock_state(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionState {
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Idle/Terminal → Connecting. Returns the new generation.
    pub fn begin_connect(&mut self) -> WsResult<u64> {
        if self.phase.is_active() {
            return Err(WebSocketError::AlreadyConnected);
        }
        self.generation += 1;
        self.phase = ConnectionPhase::Connecting;
        tracing::info!(generation = self.generation, "connecting");
        Ok(self.generation)
    }

    /// Connecting → Idle after a failed first attempt.
    pub fn connect_failed(&mut self, generation: u64) {
        if self.is_current(generation) && self.phase == ConnectionPhase::Connecting {
            self.phase = ConnectionPhase::Idle;
            self.running = false;
        }
    }

    /// Connecting/Reconnecting → Connected.
    pub fn connected(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.phase = ConnectionPhase::Connected;
        self.running = true;
        tracing::info!(generation, "connected");
        true
    }

    /// Connected/Reconnecting → Reconnecting{attempt}.
    pub fn reconnecting(&mut self, generation: u64, attempt: u32) -> bool {
        if !self.is_current(generation) || !self.running {
            return false;
        }
        self.phase = ConnectionPhase::Reconnecting { attempt };
        tracing::info!(generation, attempt, "reconnecting");
        true
    }

    /// → Terminal. The receive task stops for good.
    pub fn terminal(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.phase = ConnectionPhase::Terminal;
        self.running = false;
        tracing::info!(generation, "connection terminal");
        true
    }

    /// Any phase → Idle, fencing off the current receive task.
    /// Returns the phase that was left.
    pub fn stop(&mut self) -> ConnectionPhase {
        let previous = self.phase;
        self.generation += 1;
        self.phase = ConnectionPhase::Idle;
        self.running = false;
        previous
    }
}

/// Full-jitter exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// `min(max_delay, base_delay * 2^attempt)` for a 0-based attempt.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the given 0-based attempt, or `None` once attempts are exhausted.
    pub fn delay(&self, attempt: u32, jitter: &dyn JitterSource) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(jitter.sample(self.ceiling(attempt)).min(self.ceiling(attempt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::timing::FixedJitter;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
        }
    }

    #[test]
    fn test_backoff_ceiling() {
        let policy = policy();
        assert_eq!(policy.ceiling(0), Duration::from_millis(1000));
        assert_eq!(policy.ceiling(1), Duration::from_millis(2000));
        assert_eq!(policy.ceiling(4), Duration::from_millis(16000));
        assert_eq!(policy.ceiling(5), Duration::from_millis(30000));
        assert_eq!(policy.ceiling(40), Duration::from_millis(30000));
    }

    #[test]
    fn test_delay_is_jittered_and_bounded() {
        let policy = policy();
        let full = FixedJitter { fraction: 1.0 };
        let none = FixedJitter { fraction: 0.0 };
        assert_eq!(policy.delay(1, &full), Some(Duration::from_millis(2000)));
        assert_eq!(policy.delay(1, &none), Some(Duration::ZERO));
        assert_eq!(policy.delay(3, &full), None);
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let mut state = ConnectionState::default();
        let generation = state.begin_connect().unwrap();
        assert_eq!(state.begin_connect(), Err(WebSocketError::AlreadyConnected));

        assert!(state.connected(generation));
        assert!(state.is_connected());
        assert_eq!(state.begin_connect(), Err(WebSocketError::AlreadyConnected));
    }

    #[test]
    fn test_failed_connect_returns_to_idle() {
        let mut state = ConnectionState::default();
        let generation = state.begin_connect().unwrap();
        state.connect_failed(generation);
        assert_eq!(state.phase(), ConnectionPhase::Idle);
        assert!(state.begin_connect().is_ok());
    }

    #[test]
    fn test_reconnect_cycle_and_terminal() {
        let mut state = ConnectionState::default();
        let generation = state.begin_connect().unwrap();
        state.connected(generation);

        assert!(state.reconnecting(generation, 1));
        assert_eq!(state.phase(), ConnectionPhase::Reconnecting { attempt: 1 });
        assert!(state.connected(generation));

        assert!(state.reconnecting(generation, 1));
        assert!(state.terminal(generation));
        assert_eq!(state.phase(), ConnectionPhase::Terminal);
        assert!(!state.is_running());

        // Terminal accepts a fresh connect.
        assert!(state.begin_connect().unwrap() > generation);
    }

    #[test]
    fn test_stop_fences_old_generation() {
        let mut state = ConnectionState::default();
        let generation = state.begin_connect().unwrap();
        state.connected(generation);

        assert_eq!(state.stop(), ConnectionPhase::Connected);
        assert!(!state.reconnecting(generation, 1));
        assert!(!state.connected(generation));
        assert!(!state.terminal(generation));
        assert_eq!(state.phase(), ConnectionPhase::Idle);
    }
}

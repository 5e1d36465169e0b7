//! Ping/pong watchdog.
//!
//! Tracks two clocks: time since the last ping was sent and time since the
//! oldest unanswered ping. A pong (application `pong` frame or transport
//! pong) answers every outstanding ping.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    /// Nothing due yet
    Idle,
    /// Ping interval elapsed
    SendPing,
    /// Pong timeout elapsed with a ping outstanding
    Dead,
}

#[derive(Debug, Clone)]
pub struct Liveness {
    ping_interval: Duration,
    pong_timeout: Duration,
    last_ping_sent: Instant,
    last_pong: Option<Instant>,
    outstanding_since: Option<Instant>,
}

impl Liveness {
    /// Start the clocks at `now`; the first ping is due one interval later.
    pub fn new(now: Instant, ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
            last_ping_sent: now,
            last_pong: None,
            outstanding_since: None,
        }
    }

    pub fn on_ping_sent(&mut self, now: Instant) {
        self.last_ping_sent = now;
        self.outstanding_since.get_or_insert(now);
    }

    pub fn on_pong(&mut self, now: Instant) {
        self.last_pong = Some(now);
        self.outstanding_since = None;
    }

    pub fn poll(&self, now: Instant) -> LivenessAction {
        if let Some(since) = self.outstanding_since {
            if now.saturating_duration_since(since) >= self.pong_timeout {
                return LivenessAction::Dead;
            }
        }
        if now.saturating_duration_since(self.last_ping_sent) >= self.ping_interval {
            return LivenessAction::SendPing;
        }
        LivenessAction::Idle
    }

    /// Earliest instant at which [`poll`](Self::poll) can change its answer.
    pub fn next_deadline(&self) -> Instant {
        let ping_due = self.last_ping_sent + self.ping_interval;
        match self.outstanding_since {
            Some(since) => ping_due.min(since + self.pong_timeout),
            None => ping_due,
        }
    }

    pub fn awaiting_pong(&self) -> bool {
        self.outstanding_since.is_some()
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }
}

//! Injectable time and randomness.
//!
//! The connection manager never sleeps or samples jitter directly; it goes
//! through [`Timer`] and [`JitterSource`] so tests can drive reconnect and
//! liveness behaviour deterministically.

use futures_util::future::BoxFuture;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Clock and sleep provider
pub trait Timer: Send + Sync + 'static {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Source of full-jitter samples
pub trait JitterSource: Send + Sync + 'static {
    /// Uniform sample in `0..=upper`.
    fn sample(&self, upper: Duration) -> Duration;
}

/// [`Timer`] backed by the tokio clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// [`JitterSource`] drawing from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self, upper: Duration) -> Duration {
        let upper_ms = upper.as_millis().min(u64::MAX as u128) as u64;
        if upper_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=upper_ms))
    }
}

/// [`JitterSource`] that always returns a fixed fraction of the ceiling
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter {
    /// In `[0.0, 1.0]`
    pub fraction: f64,
}

impl JitterSource for FixedJitter {
    fn sample(&self, upper: Duration) -> Duration {
        upper.mul_f64(self.fraction.clamp(0.0, 1.0))
    }
}

pub type SharedTimer = Arc<dyn Timer>;
pub type SharedJitter = Arc<dyn JitterSource>;

/// Run `future` unless `timer` fires first.
pub async fn with_timeout<F, T>(timer: &dyn Timer, duration: Duration, future: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        out = future => Some(out),
        _ = timer.sleep(duration) => None,
    }
}

//! Time source abstraction for the rate limiter.
//!
//! The limiter only ever asks "what time is it now?" and does all of its
//! refill and expiry math on monotonic [`Instant`]s, so a wall-clock jump
//! (NTP correction, suspend/resume) can never mint or destroy tokens.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A source of monotonic time.
///
/// Implementations must be cheap to call; `now` sits on the hot path of
/// every rate limit check.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Production clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually driven clock.
///
/// Primarily useful for tests and deterministic scenarios: clones share the
/// same underlying instant, so a test can hold one handle while the limiter
/// owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a manual clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }

    /// Move the clock backwards by `delta`.
    ///
    /// Exists to exercise clock-anomaly handling; the limiter must treat a
    /// rewound clock as zero elapsed time.
    pub fn rewind(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now -= delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

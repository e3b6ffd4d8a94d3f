use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall clock abstraction used by every time-dependent calculation in the monitor.
///
/// - now_ms(): milliseconds since the Unix epoch
/// - ms_since(): helper to compute elapsed milliseconds from an earlier reading
///
/// Phase timers and predictions are persisted as epoch timestamps and must stay
/// meaningful across restarts, which is why this is a wall clock and not `Instant`.
pub trait Clock {
    fn now_ms(&self) -> i64;

    /// Milliseconds elapsed since `epoch_ms`, saturating at 0 when the clock went backwards.
    fn ms_since(&self, epoch_ms: i64) -> u64 {
        u64::try_from(self.now_ms().saturating_sub(epoch_ms)).unwrap_or(0)
    }
}

/// Real-time clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Deterministic clock whose time is advanced manually.
///
/// Clones share the same time source, so a test (or a log replayer) can keep
/// one handle while the monitor owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<i64>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_ms)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        let step = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        if let Ok(mut now) = self.now.lock() {
            *now = now.saturating_add(step);
        }
    }

    /// Set the absolute epoch time in milliseconds.
    pub fn set_ms(&self, ms: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now = ms;
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.lock().map(|g| *g).unwrap_or(0)
    }
}

impl<C: Clock + ?Sized> Clock for Box<C> {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }
}

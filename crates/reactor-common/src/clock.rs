//! Monotonic and wall-clock time sources.
//!
//! The event loop only ever asks "how long until the next delayed task"
//! and "what time is it"; it never reads the OS clock directly. This keeps
//! `AdvanceTimeForTesting`-style determinism possible without threading a
//! mock through every call site.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering::SeqCst};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of monotonic ("steady") time, expressed in milliseconds.
///
/// A small enum rather than a trait object, cheap to clone, with a `Mock`
/// variant used by tests to control the passage of time deterministically.
#[derive(Debug, Clone)]
pub enum MonotonicClock {
    /// Backed by `std::time::Instant`.
    System(Arc<Instant>),
    /// Fixed origin plus an atomically-adjustable offset, for tests.
    Mock(Arc<AtomicI64>),
}

impl MonotonicClock {
    pub fn system() -> Self {
        MonotonicClock::System(Arc::new(Instant::now()))
    }

    pub fn new_mock(now_ms: i64) -> Self {
        MonotonicClock::Mock(Arc::new(AtomicI64::new(now_ms)))
    }

    /// Milliseconds since an arbitrary, clock-specific epoch. Only valid for
    /// computing deltas against other readings of the *same* clock instance.
    pub fn now_ms(&self) -> i64 {
        match self {
            MonotonicClock::System(origin) => origin.elapsed().as_millis() as i64,
            MonotonicClock::Mock(now) => now.load(SeqCst),
        }
    }

    /// Advances a mock clock by `delta`. No-op (and a bug) on `System`.
    pub fn advance(&self, delta: Duration) {
        match self {
            MonotonicClock::System(_) => {
                debug_assert!(false, "cannot advance the system monotonic clock");
            }
            MonotonicClock::Mock(now) => {
                now.fetch_add(delta.as_millis() as i64, SeqCst);
            }
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock::system()
    }
}

/// A source of wall-clock ("system") time, expressed as milliseconds since
/// the Unix epoch.
#[derive(Debug, Clone)]
pub enum WallClock {
    System,
    Mock(Arc<AtomicI64>),
}

impl WallClock {
    pub fn new_mock(now_unix_ms: i64) -> Self {
        WallClock::Mock(Arc::new(AtomicI64::new(now_unix_ms)))
    }

    pub fn now_unix_ms(&self) -> i64 {
        match self {
            WallClock::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before unix epoch")
                .as_millis() as i64,
            WallClock::Mock(now) => now.load(SeqCst),
        }
    }

    pub fn set_time(&self, now_unix_ms: i64) {
        match self {
            WallClock::System => debug_assert!(false, "cannot set the system wall clock"),
            WallClock::Mock(now) => now.store(now_unix_ms, SeqCst),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        WallClock::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_monotonic_advances() {
        let clock = MonotonicClock::new_mock(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 1_250);
    }

    #[test]
    fn system_monotonic_is_nondecreasing() {
        let clock = MonotonicClock::system();
        let a = clock.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn mock_wall_clock_roundtrip() {
        let clock = WallClock::new_mock(1_700_000_000_000);
        assert_eq!(clock.now_unix_ms(), 1_700_000_000_000);
        clock.set_time(1_700_000_001_000);
        assert_eq!(clock.now_unix_ms(), 1_700_000_001_000);
    }
}

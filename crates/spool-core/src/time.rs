//! Clock abstraction for retry scheduling.
//!
//! The drain loop only needs a monotonic `now` and a way to wait for the next
//! retry deadline. Production code uses `SystemClock`; tests inject a
//! `TestClock` so backoff behaviour is deterministic and instantaneous.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Source of monotonic time for the producer.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    ///
    /// Test implementations advance virtual time instead of blocking.
    fn sleep(&self, duration: Duration);
}

/// Clock backed by `Instant::now` and `thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same time source, so a test can keep one handle while
/// the producer owns another.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    base: Instant,
}

impl TestClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self { elapsed_ns: Arc::new(AtomicU64::new(0)), base: Instant::now() }
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(10));

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(10));
    }

    #[test]
    fn test_clock_sleep_is_virtual() {
        let clock = TestClock::new();
        let handle = clock.clone();

        clock.sleep(Duration::from_secs(3600));

        assert_eq!(handle.elapsed(), Duration::from_secs(3600));
    }
}

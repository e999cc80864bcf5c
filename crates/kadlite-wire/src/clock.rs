//! Tick sources for `last_seen` stamps.

use kadlite_types::Tick;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// A monotonic source of [`Tick`]s.
pub trait TickSource: Send + Sync + 'static {
    fn now(&self) -> Tick;
}

/// Milliseconds elapsed since construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicClock {
    fn now(&self) -> Tick {
        Tick(self.origin.elapsed().as_millis() as u64)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    tick: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            tick: AtomicU64::new(start),
        }
    }

    /// Move forward by `by` ticks, returning the new value.
    pub fn advance(&self, by: u64) -> Tick {
        Tick(self.tick.fetch_add(by, Ordering::SeqCst) + by)
    }

    pub fn set(&self, tick: u64) {
        self.tick.store(tick, Ordering::SeqCst);
    }
}

impl TickSource for ManualClock {
    fn now(&self) -> Tick {
        Tick(self.tick.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now(), Tick(10));
        assert_eq!(clock.advance(5), Tick(15));
        clock.set(3);
        assert_eq!(clock.now(), Tick(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_runtime_time() {
        let clock = MonotonicClock::new();
        let before = clock.now();
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        let after = clock.now();
        assert!(after >= before);
        assert_eq!(after.0 - before.0, 250);
    }
}

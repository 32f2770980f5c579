//! Wall-clock sources for transition timestamps.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of "now" for transition timestamps and SLA arithmetic.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time anchored at construction and advanced by the tokio clock.
///
/// Under a paused runtime this moves with `tokio::time::advance`, so
/// persisted timestamps agree with the timers that fire against them.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            wall_origin: Utc::now(),
            origin: Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn runtime_clock_follows_paused_time() {
        let clock = RuntimeClock::new();
        let before = clock.now();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!((clock.now() - before).num_seconds(), 3600);
    }
}

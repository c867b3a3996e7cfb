//! Fixed-interval pacing for sequential remote calls.

use std::time::Duration;

use tracing::debug;

/// Pauses for `pause` after every `every` completed calls.
///
/// Remote APIs used here have implicit rate limits, so every sequential loop
/// over remote calls ticks a throttle once per call. Sleeping goes through
/// `tokio::time`, which lets tests drive it with a paused clock.
#[derive(Debug, Clone)]
pub struct Throttle {
    every: usize,
    pause: Duration,
    calls: usize,
}

impl Throttle {
    /// Create a throttle. An `every` of zero is treated as one.
    pub fn new(every: usize, pause: Duration) -> Self {
        Self { every: every.max(1), pause, calls: 0 }
    }

    /// Number of calls recorded so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Record one completed call, sleeping if it closes an interval.
    ///
    /// Returns `true` if this tick paused.
    pub async fn tick(&mut self) -> bool {
        self.calls += 1;
        if self.calls % self.every != 0 || self.pause.is_zero() {
            return false;
        }
        debug!(calls = self.calls, pause_ms = self.pause.as_millis() as u64, "throttling");
        tokio::time::sleep(self.pause).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn pauses_after_every_nth_call() {
        let mut throttle = Throttle::new(3, Duration::from_secs(1));
        let start = Instant::now();

        let mut paused = Vec::new();
        for _ in 0..7 {
            paused.push(throttle.tick().await);
        }

        assert_eq!(paused, [false, false, true, false, false, true, false]);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(throttle.calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_pause_never_sleeps() {
        let mut throttle = Throttle::new(1, Duration::ZERO);
        let start = Instant::now();
        for _ in 0..5 {
            assert!(!throttle.tick().await);
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}

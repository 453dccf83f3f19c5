use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Shortest period a background loop will tick at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Interval for a background loop. A zero `period` is clamped to
/// [`MIN_PERIOD`]; the first tick completes immediately.
pub(crate) fn ticker(period: Duration) -> Interval {
    if period.is_zero() {
        warn!(target: "quest::poll", "zero polling period; clamping to {MIN_PERIOD:?}");
    }
    let mut ticker = tokio::time::interval(period.max(MIN_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Bounded re-poll plan: `attempts` runs, the first immediate, then gaps that
/// start at `first_gap` and are multiplied by `growth` after each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub attempts: u32,
    pub first_gap: Duration,
    pub growth: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            attempts: 3,
            first_gap: Duration::from_millis(500),
            growth: 3,
        }
    }
}

impl PollSchedule {
    /// Offsets from the start of the run at which each attempt fires.
    pub fn offsets(&self) -> Vec<Duration> {
        let mut offsets = Vec::with_capacity(self.attempts as usize);
        let mut at = Duration::ZERO;
        let mut gap = self.first_gap;
        for index in 0..self.attempts {
            if index > 0 {
                at += gap;
                gap = gap.saturating_mul(self.growth.max(1));
            }
            offsets.push(at);
        }
        offsets
    }

    /// Runs `step` once per attempt, sleeping between attempts. Returns the
    /// number of attempts that ran before completion or cancellation.
    pub async fn run<F, Fut>(&self, token: &CancellationToken, mut step: F) -> u32
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut gap = self.first_gap;
        let mut ran = 0;
        for attempt in 0..self.attempts {
            if attempt > 0 {
                tokio::select! {
                    _ = token.cancelled() => return ran,
                    _ = tokio::time::sleep(gap) => {}
                }
                gap = gap.saturating_mul(self.growth.max(1));
            }
            if token.is_cancelled() {
                return ran;
            }
            step(attempt).await;
            ran += 1;
        }
        ran
    }
}

/// A background polling task that can be cancelled before it finishes.
#[derive(Debug)]
pub struct CascadeHandle {
    token: CancellationToken,
    task: JoinHandle<u32>,
}

impl CascadeHandle {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<u32>) -> Self {
        Self { token, task }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the cascade to stop and returns how many attempts ran.
    pub async fn join(self) -> u32 {
        self.task.await.unwrap_or(0)
    }
}

/// A long-running background loop owned by the caller.
#[derive(Debug)]
pub struct BackgroundTask {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl BackgroundTask {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { token, task }
    }

    /// Requests a stop; the loop exits at its next suspension point.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn stopped(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            if err.is_panic() {
                error!(target: "quest::poll", error = %err, "background task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn default_offsets_are_zero_half_second_two_seconds() {
        let offsets = PollSchedule::default().offsets();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(2000)
            ]
        );
    }

    #[test]
    fn zero_attempts_yield_no_offsets() {
        let schedule = PollSchedule {
            attempts: 0,
            ..PollSchedule::default()
        };
        assert!(schedule.offsets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_fires_at_scheduled_offsets() {
        let start = Instant::now();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let ran = PollSchedule::default()
            .run(&token, |_| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(start.elapsed());
                }
            })
            .await;
        assert_eq!(ran, 3);
        assert_eq!(*seen.lock(), PollSchedule::default().offsets());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_ticker_is_clamped() {
        let mut ticker = ticker(Duration::ZERO);
        let start = Instant::now();
        ticker.tick().await;
        ticker.tick().await;
        assert_eq!(start.elapsed(), MIN_PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_remaining_attempts() {
        let token = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));
        let task = {
            let token = token.clone();
            let count = count.clone();
            tokio::spawn(async move {
                PollSchedule::default()
                    .run(&token, |_| {
                        let count = count.clone();
                        async move {
                            count.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .await
            })
        };
        let handle = CascadeHandle::new(token, task);
        tokio::time::sleep(Duration::from_millis(600)).await;
        handle.cancel();
        assert_eq!(handle.join().await, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}

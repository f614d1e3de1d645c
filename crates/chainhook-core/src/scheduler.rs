//! Fixed-interval scheduler driving the poll and delivery loops.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::Clock;

/// One self-contained unit of periodic work.
///
/// Implementations handle their own errors; a cycle never fails the loop.
#[async_trait]
pub trait Cycle: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_cycle(&self);
}

/// Runs a [`Cycle`] once per tick.
pub struct Scheduler {
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { interval, clock }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run cycles until `shutdown` is cancelled. A cycle in flight completes
    /// before the loop exits.
    pub async fn run<C: Cycle + ?Sized>(&self, cycle: &C, shutdown: CancellationToken) {
        info!(loop_name = cycle.name(), interval_ms = self.interval.as_millis() as u64, "loop started");
        let mut ticks: u64 = 0;
        while !shutdown.is_cancelled() {
            cycle.run_cycle().await;
            ticks += 1;
            debug!(loop_name = cycle.name(), ticks, "cycle complete");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.clock.sleep(self.interval) => {}
            }
        }
        info!(loop_name = cycle.name(), ticks, "loop stopped");
    }

    /// Run exactly `n` cycles, sleeping the interval after each.
    pub async fn run_ticks<C: Cycle + ?Sized>(&self, cycle: &C, n: usize) {
        for _ in 0..n {
            cycle.run_cycle().await;
            self.clock.sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        runs: AtomicUsize,
        stop_after: usize,
        token: CancellationToken,
    }

    #[async_trait]
    impl Cycle for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn run_cycle(&self) {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.stop_after {
                self.token.cancel();
            }
        }
    }

    #[tokio::test]
    async fn run_ticks_advances_clock_per_tick() {
        let clock = ManualClock::new();
        let start = clock.now();
        let scheduler = Scheduler::new(Duration::from_secs(10), Arc::new(clock.clone()));
        let cycle = Counter {
            runs: AtomicUsize::new(0),
            stop_after: usize::MAX,
            token: CancellationToken::new(),
        };
        scheduler.run_ticks(&cycle, 3).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 3);
        assert_eq!(clock.now() - start, chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let token = CancellationToken::new();
        let scheduler = Scheduler::new(Duration::from_secs(5), Arc::new(ManualClock::new()));
        let cycle = Counter {
            runs: AtomicUsize::new(0),
            stop_after: 4,
            token: token.clone(),
        };
        scheduler.run(&cycle, token).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let scheduler = Scheduler::new(Duration::from_secs(5), Arc::new(ManualClock::new()));
        let cycle = Counter {
            runs: AtomicUsize::new(0),
            stop_after: 1,
            token: token.clone(),
        };
        scheduler.run(&cycle, token).await;
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 0);
    }
}

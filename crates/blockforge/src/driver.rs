//! Tick Driver
//!
//! Advances a [`TickQueue`] on a wall-clock interval until a shutdown signal
//! arrives or an optional tick budget runs out.

use std::sync::Arc;
use std::time::Duration;

use codeblock_runtime::{TickQueue, TickScheduler};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Totals reported when the driver stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverReport {
    pub ticks: u64,
    pub tasks_run: usize,
}

/// Drives the simulation clock
pub struct TickDriver {
    queue: Arc<TickQueue>,
    interval: Duration,
    max_ticks: Option<u64>,
}

impl TickDriver {
    pub fn new(queue: Arc<TickQueue>, interval: Duration) -> Self {
        Self {
            queue,
            interval: interval.max(Duration::from_millis(1)),
            max_ticks: None,
        }
    }

    /// Stop on its own after `ticks` ticks
    pub fn with_max_ticks(mut self, ticks: Option<u64>) -> Self {
        self.max_ticks = ticks;
        self
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> DriverReport {
        let mut report = DriverReport::default();
        if self.max_ticks == Some(0) {
            return report;
        }

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately
        timer.tick().await;

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            max_ticks = ?self.max_ticks,
            "Tick driver started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Tick driver received shutdown signal");
                    break;
                }

                _ = timer.tick() => {
                    report.tasks_run += self.queue.tick();
                    report.ticks += 1;

                    if self.max_ticks.is_some_and(|max| report.ticks >= max) {
                        tracing::debug!(ticks = report.ticks, "Tick budget reached");
                        break;
                    }
                }
            }
        }

        tracing::info!(
            ticks = report.ticks,
            tasks_run = report.tasks_run,
            current_tick = self.queue.current_tick(),
            "Tick driver stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeblock_runtime::TaskControl;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_tick_budget() {
        let queue = Arc::new(TickQueue::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        queue.schedule_repeating(
            1,
            1,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                TaskControl::Continue
            }),
        );

        let (_tx, rx) = broadcast::channel(1);
        let report = TickDriver::new(Arc::clone(&queue), Duration::from_millis(50))
            .with_max_ticks(Some(5))
            .run(rx)
            .await;

        assert_eq!(report.ticks, 5);
        assert_eq!(report.tasks_run, 5);
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert_eq!(queue.current_tick(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_shutdown() {
        let queue = Arc::new(TickQueue::new());
        let (tx, rx) = broadcast::channel(1);
        let driver = TickDriver::new(Arc::clone(&queue), Duration::from_millis(50));

        let handle = tokio::spawn(driver.run(rx));
        tokio::time::sleep(Duration::from_millis(175)).await;
        tx.send(()).unwrap();

        let report = tokio_test::assert_ok!(handle.await);
        assert_eq!(report.ticks, 3);
    }

    #[tokio::test]
    async fn test_zero_budget_returns_immediately() {
        let (_tx, rx) = broadcast::channel(1);
        let report = TickDriver::new(Arc::new(TickQueue::new()), Duration::from_millis(50))
            .with_max_ticks(Some(0))
            .run(rx)
            .await;
        assert_eq!(report, DriverReport::default());
    }
}

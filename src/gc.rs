use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::queue::ActionQueue;

/// Removes terminal actions once they are older than the retention window.
pub struct GarbageCollector {
    queue: Arc<ActionQueue>,
    retention: Duration,
    interval: Duration,
}

/// Running collector task. Dropping it leaves the task running; call `stop`.
pub struct GcHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl GcHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl GarbageCollector {
    pub fn new(queue: Arc<ActionQueue>, retention: Duration, interval: Duration) -> Self {
        Self {
            queue,
            retention,
            interval,
        }
    }

    /// Run one sweep as of `now`. Returns the number of actions removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return 0;
        };

        let removed = self
            .queue
            .terminal_before(cutoff)
            .into_iter()
            .filter(|id| self.queue.purge(*id).is_some())
            .count();

        if removed > 0 {
            tracing::info!("Garbage collector removed {removed} finished actions");
        }
        removed
    }

    /// Start sweeping on the configured interval until `stop` is called.
    pub fn start(self) -> GcHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        GcHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(
            "Garbage collector started (interval={:?}, retention={:?})",
            self.interval,
            self.retention
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so startup does not sweep.
        ticker.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Garbage collector stopped");
    }
}

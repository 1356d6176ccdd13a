//! Poller: asks for the turn once per interval, forever.
//!
//! No jitter and no backoff. Contention between workers is settled by the
//! store's transaction ordering. Attempts never overlap within a process:
//! a tick that comes due while a job is still running is delayed, not
//! queued up.

use crate::coordinator::TurnCoordinator;
use crate::executor::{RunOutcome, WorkExecutor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::info;

#[derive(Clone)]
pub struct Poller {
    coordinator: TurnCoordinator,
    executor: WorkExecutor,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl Poller {
    pub fn new(coordinator: TurnCoordinator, executor: WorkExecutor, interval: Duration) -> Self {
        Self {
            coordinator,
            executor,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the loop to stop after the current cycle.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// One cycle: attempt the turn and run the job if granted.
    pub async fn poll_once(&self) -> RunOutcome {
        let turn = self.coordinator.attempt_turn().await;
        self.executor.execute(turn).await
    }

    /// Poll until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; wait a full interval like a timer would.
        ticker.tick().await;

        info!(
            server_id = %self.coordinator.server_id(),
            interval_ms = self.interval.as_millis() as u64,
            "poller started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(server_id = %self.coordinator.server_id(), "poller shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let outcome = self.poll_once().await;
                    if outcome == RunOutcome::NoOp {
                        info!(server_id = %self.coordinator.server_id(), "standing by");
                    }
                }
            }
        }
    }
}

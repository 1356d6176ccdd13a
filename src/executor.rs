//! Work executor: runs the job for a granted turn and always gives the turn
//! back afterwards.
//!
//! Job failures and panics are captured in [`RunOutcome::Failed`] instead of
//! propagating, so one bad run never stops the poll loop. The job is not
//! retried here. If the release write itself fails the lock stays held until
//! the crash-recovery timeout lets the next worker in line take over.

use crate::coordinator::{Turn, TurnCoordinator};
use crate::job::{Job, RunContext};
use crate::telemetry::metrics;
use crate::telemetry::turn::{record_run_outcome, start_turn_span};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, error, info};
use uuid::Uuid;

/// Result of one pass through the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job ran and returned normally.
    Success { duration_ms: u64 },
    /// Not our turn; nothing ran.
    NoOp,
    /// The job returned an error or panicked.
    Failed { reason: String, duration_ms: u64 },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Success { .. } => "success",
            RunOutcome::NoOp => "noop",
            RunOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Clone)]
pub struct WorkExecutor {
    coordinator: TurnCoordinator,
    job: Arc<dyn Job>,
}

impl WorkExecutor {
    pub fn new(coordinator: TurnCoordinator, job: Arc<dyn Job>) -> Self {
        Self { coordinator, job }
    }

    /// Run the job if `turn` was granted, then release the lock.
    pub async fn execute(&self, turn: Turn) -> RunOutcome {
        if !turn.is_granted() {
            return RunOutcome::NoOp;
        }

        let server_id = self.coordinator.server_id().to_string();
        let run_id = Uuid::new_v4();
        let span = start_turn_span(&server_id, &run_id);
        let ctx = RunContext { server_id, run_id };

        // Spawned so a panicking job is contained and the release below still runs.
        let job = Arc::clone(&self.job);
        let start = Instant::now();
        let joined =
            tokio::spawn(async move { job.run(&ctx).await }.instrument(span.clone())).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match joined {
            Ok(Ok(())) => RunOutcome::Success { duration_ms },
            Ok(Err(e)) => RunOutcome::Failed {
                reason: format!("{e:#}"),
                duration_ms,
            },
            Err(e) if e.is_panic() => RunOutcome::Failed {
                reason: format!("job panicked: {e}"),
                duration_ms,
            },
            Err(e) => RunOutcome::Failed {
                reason: format!("job task did not complete: {e}"),
                duration_ms,
            },
        };

        async {
            if let RunOutcome::Failed { ref reason, .. } = outcome {
                error!(%reason, duration_ms, "job failed");
            }
            self.release().await;
        }
        .instrument(span.clone())
        .await;

        record_run_outcome(&span, outcome.label(), duration_ms);
        metrics::run_outcomes().add(1, &[KeyValue::new("outcome", outcome.label())]);
        metrics::run_duration_ms().record(duration_ms as f64, &[]);
        outcome
    }

    async fn release(&self) {
        let server_id = self.coordinator.server_id();
        match self.coordinator.release().await {
            Ok(()) => {
                metrics::lock_releases().add(1, &[KeyValue::new("result", "ok")]);
                info!(%server_id, "finished the turn and released the lock");
            }
            Err(e) => {
                metrics::lock_releases().add(1, &[KeyValue::new("result", "error")]);
                error!(
                    %server_id,
                    error = %e,
                    "could not release the lock, it stays held until the crash-recovery timeout"
                );
            }
        }
    }
}

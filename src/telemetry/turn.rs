//! Turn execution span helpers.
//!
//! One span covers a granted turn from the moment the lock is taken until
//! it is released.

use tracing::Span;
use uuid::Uuid;

/// Start a span for a granted turn.
///
/// The `run.outcome` field is declared empty and is filled in by
/// [`record_run_outcome`].
pub fn start_turn_span(server_id: &str, run_id: &Uuid) -> Span {
    tracing::info_span!(
        "turn.run",
        "server.id" = server_id,
        "run.id" = %run_id,
        "run.outcome" = tracing::field::Empty,
    )
}

/// Record how the run ended on the span and emit an event inside it.
pub fn record_run_outcome(span: &Span, outcome: &str, duration_ms: u64) {
    span.record("run.outcome", outcome);
    span.in_scope(|| {
        tracing::info!(outcome, duration_ms, "run_finished");
    });
}

//! Metric instrument factories for rota.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"rota"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for rota instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("rota")
}

/// Counter: turn attempts.
/// Labels: `result` ("granted" | "standby" | "error").
pub fn turn_attempts() -> Counter<u64> {
    meter()
        .u64_counter("rota.turn.attempts")
        .with_description("Number of turn attempts")
        .build()
}

/// Counter: stale locks reset after the crash-recovery timeout.
/// Labels: `committed` ("true" | "false").
pub fn turn_recoveries() -> Counter<u64> {
    meter()
        .u64_counter("rota.turn.recoveries")
        .with_description("Stale turns detected past the crash-recovery timeout")
        .build()
}

/// Counter: registrations.
/// Labels: `result` ("added" | "present").
pub fn registrations() -> Counter<u64> {
    meter()
        .u64_counter("rota.registry.registrations")
        .with_description("Number of server registrations")
        .build()
}

/// Counter: job runs by outcome.
/// Labels: `outcome` ("success" | "failed").
pub fn run_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("rota.run.outcomes")
        .with_description("Number of job runs by outcome")
        .build()
}

/// Histogram: job run duration in milliseconds.
pub fn run_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("rota.run.duration_ms")
        .with_description("Job run duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: lock releases.
/// Labels: `result` ("ok" | "error").
pub fn lock_releases() -> Counter<u64> {
    meter()
        .u64_counter("rota.lock.releases")
        .with_description("Number of lock releases")
        .build()
}

/// Counter: document store operations.
/// Labels: `operation` ("commit" | "abort" | "retry" | "set_running").
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("rota.store.operations")
        .with_description("Number of shared document operations")
        .build()
}

/// Counter: dedup cache operations.
/// Labels: `operation` ("check" | "mark" | "mark_failed").
pub fn dedup_operations() -> Counter<u64> {
    meter()
        .u64_counter("rota.dedup.operations")
        .with_description("Number of seen-set operations")
        .build()
}

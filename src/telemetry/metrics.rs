//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("request-injector")
}

/// Counter: finished injection jobs.
/// Labels: `kind` ("request" | "chain"), `outcome`.
pub fn injections() -> Counter<u64> {
    meter()
        .u64_counter("injector.injections")
        .with_description("Number of finished injection jobs")
        .build()
}

/// Counter: injection state machine transitions.
/// Labels: `from`, `to`.
pub fn injection_transitions() -> Counter<u64> {
    meter()
        .u64_counter("injector.injection.state_transitions")
        .with_description("Number of injection state transitions")
        .build()
}

/// Counter: approval command attempts.
/// Labels: `result` ("ok" | "retry" | "failed" | "error").
pub fn approval_attempts() -> Counter<u64> {
    meter()
        .u64_counter("injector.approval.attempts")
        .with_description("Number of approval command executions")
        .build()
}

/// Counter: notifications handled by the coalescer.
/// Labels: `action` ("sent" | "accumulated" | "flushed" | "failed").
pub fn notifications() -> Counter<u64> {
    meter()
        .u64_counter("injector.notifications")
        .with_description("Number of notifications handled")
        .build()
}

/// Counter: worker pool task completions.
/// Labels: `result` ("ok" | "error" | "panic" | "aborted").
pub fn pool_tasks() -> Counter<u64> {
    meter()
        .u64_counter("injector.pool.tasks")
        .with_description("Number of tasks run by the worker pool")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("injector.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}

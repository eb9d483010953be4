//! Injection job span helpers.

use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use tracing::Span;

/// Start a span covering one injection job.
///
/// `inject.batch` is declared empty and filled once a batch id is known.
pub fn start_injection_span(kind: &str, prepid: &str) -> Span {
    tracing::info_span!(
        "inject.run",
        "inject.kind" = kind,
        "inject.prepid" = prepid,
        "inject.batch" = tracing::field::Empty,
        "inject.state" = tracing::field::Empty,
    )
}

/// Record the batch id on an injection span.
pub fn record_batch(span: &Span, batch_id: &str) {
    span.record("inject.batch", batch_id);
}

/// Record a state transition on the span and count it.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("inject.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
    metrics::injection_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

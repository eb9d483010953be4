//! Integration tests for telemetry initialization and span helpers.

use request_injector::inject::InjectionState;
use request_injector::telemetry::{TelemetryConfig, inject, init_telemetry, metrics};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "injector-test".to_string(),
        default_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = init_telemetry(config);
}

#[test]
fn injection_span_records_batch_and_transitions() {
    let span = inject::start_injection_span("request", "PPD-Run3-00001");
    inject::record_batch(&span, "Run3-00001");
    inject::record_state_transition(
        &span,
        InjectionState::PendingApproval.as_str(),
        InjectionState::LockAcquired.as_str(),
    );
}

#[test]
fn metric_instruments_build_against_the_noop_provider() {
    metrics::injections().add(1, &[]);
    metrics::approval_attempts().add(1, &[]);
    metrics::notifications().add(1, &[]);
    metrics::pool_tasks().add(1, &[]);
    metrics::operation_duration_ms().record(12.5, &[]);
}

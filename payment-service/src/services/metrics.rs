//! Prometheus metrics for the payment service.
//!
//! Domain metrics live in the default prometheus registry; HTTP middleware
//! metrics flow through the `metrics` facade into the installed recorder.
//! `get_metrics` renders both.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, Encoder,
    HistogramVec, IntCounter, TextEncoder,
};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Counter for payments accepted by the intake gateway.
pub static PAYMENTS_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_created_total",
        "Payments accepted by the intake gateway",
        &["currency", "outcome"]
    )
    .expect("Failed to register PAYMENTS_CREATED")
});

/// Counter for terminal transitions committed by settlement workers.
pub static SETTLEMENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_settlements_total",
        "Settlement transitions committed by workers",
        &["status"]
    )
    .expect("Failed to register SETTLEMENTS")
});

/// Histogram for time from dequeue to committed transition.
pub static SETTLEMENT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payment_settlement_duration_seconds",
        "Time from dequeue to committed transition",
        &["status"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register SETTLEMENT_DURATION")
});

/// Histogram for store query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payment_db_query_duration_seconds",
        "Store query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for stale pending payments requeued by the reconciliation sweep.
pub static SWEEP_REQUEUES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "payment_sweep_requeued_total",
        "Stale pending payments requeued by the reconciliation sweep"
    )
    .expect("Failed to register SWEEP_REQUEUES")
});

/// Initialize metrics: force lazy registration and install the facade
/// recorder. Safe to call more than once; later calls are no-ops.
pub fn init_metrics() {
    Lazy::force(&PAYMENTS_CREATED);
    Lazy::force(&SETTLEMENTS);
    Lazy::force(&SETTLEMENT_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&SWEEP_REQUEUES);

    if METRICS_HANDLE.get().is_none() {
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            let _ = METRICS_HANDLE.set(handle);
        }
    }
}

/// Render all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return output;
    }
    output.push_str(&String::from_utf8(buffer).unwrap_or_default());

    output
}

/// Record an accepted create, fresh or replayed.
pub fn record_created(currency: &str, replayed: bool) {
    let outcome = if replayed { "replayed" } else { "created" };
    PAYMENTS_CREATED
        .with_label_values(&[currency, outcome])
        .inc();
}

/// Record a committed settlement transition.
pub fn record_settlement(status: &str, duration_secs: f64) {
    SETTLEMENTS.with_label_values(&[status]).inc();
    SETTLEMENT_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record one requeue performed by the reconciliation sweep.
pub fn record_sweep_requeue() {
    SWEEP_REQUEUES.inc();
}

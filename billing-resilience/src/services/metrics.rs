//! Metrics module for billing-resilience.
//! Provides Prometheus metrics for the retry engine and credit metering.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram, register_histogram_vec, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_resilience_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Sweep runs by outcome
pub static SWEEP_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Sweep duration
pub static SWEEP_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Charge attempts by trigger and outcome
pub static RETRY_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment failure transitions by resulting status
pub static FAILURE_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Plan downgrades after grace expiry
pub static DOWNGRADES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Credits granted by kind
pub static CREDITS_CONSUMED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Credit requests refused by kind
pub static CREDITS_DENIED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Notification deliveries by event and outcome
pub static NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    SWEEP_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_resilience_sweep_runs_total", "Retry sweeps by outcome"),
            &["outcome"]
        )
        .expect("Failed to register SWEEP_RUNS_TOTAL")
    });

    SWEEP_DURATION.get_or_init(|| {
        register_histogram!(histogram_opts!(
            "billing_resilience_sweep_duration_seconds",
            "Retry sweep duration",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 30.0, 60.0]
        ))
        .expect("Failed to register SWEEP_DURATION")
    });

    RETRY_ATTEMPTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_resilience_retry_attempts_total",
                "Charge attempts by trigger and outcome"
            ),
            &["trigger", "outcome"]
        )
        .expect("Failed to register RETRY_ATTEMPTS_TOTAL")
    });

    FAILURE_TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_resilience_failure_transitions_total",
                "Payment failure transitions by resulting status"
            ),
            &["status"]
        )
        .expect("Failed to register FAILURE_TRANSITIONS_TOTAL")
    });

    DOWNGRADES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_resilience_downgrades_total",
                "Plan downgrades after grace expiry"
            ),
            &["from_plan"]
        )
        .expect("Failed to register DOWNGRADES_TOTAL")
    });

    CREDITS_CONSUMED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_resilience_credits_consumed_total",
                "Credits granted by kind"
            ),
            &["kind"]
        )
        .expect("Failed to register CREDITS_CONSUMED_TOTAL")
    });

    CREDITS_DENIED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_resilience_credits_denied_total",
                "Credit requests refused by kind"
            ),
            &["kind"]
        )
        .expect("Failed to register CREDITS_DENIED_TOTAL")
    });

    NOTIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_resilience_notifications_total",
                "Notification deliveries by event and outcome"
            ),
            &["event", "outcome"]
        )
        .expect("Failed to register NOTIFICATIONS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_resilience_errors_total",
                "Total errors by type for alerting"
            ),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_sweep(outcome: &str, duration_secs: f64) {
    if let Some(counter) = SWEEP_RUNS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
    if let Some(histogram) = SWEEP_DURATION.get() {
        histogram.observe(duration_secs);
    }
}

/// Record a charge attempt. `trigger` is `sweep` or `manual`.
pub fn record_retry_attempt(trigger: &str, outcome: &str) {
    if let Some(counter) = RETRY_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[trigger, outcome]).inc();
    }
}

pub fn record_failure_transition(status: &str) {
    if let Some(counter) = FAILURE_TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

pub fn record_downgrade(from_plan: &str) {
    if let Some(counter) = DOWNGRADES_TOTAL.get() {
        counter.with_label_values(&[from_plan]).inc();
    }
}

pub fn record_credits_consumed(kind: &str, count: i64) {
    if let Some(counter) = CREDITS_CONSUMED_TOTAL.get() {
        counter
            .with_label_values(&[kind])
            .inc_by(count.max(0) as u64);
    }
}

pub fn record_credits_denied(kind: &str) {
    if let Some(counter) = CREDITS_DENIED_TOTAL.get() {
        counter.with_label_values(&[kind]).inc();
    }
}

pub fn record_notification(event: &str, outcome: &str) {
    if let Some(counter) = NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[event, outcome]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}

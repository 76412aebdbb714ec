use lazy_static::lazy_static;
use prometheus::{
    opts, register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};

lazy_static! {
    pub static ref DOCUMENTS_EXTRACTED_TOTAL: IntCounter = register_int_counter!(opts!(
        "lake_documents_extracted_total",
        "Documents whose extraction succeeded and were acked"
    ))
    .expect("Can't create a metric");
    pub static ref DOCUMENTS_FAILED_TOTAL: IntCounter = register_int_counter!(opts!(
        "lake_documents_failed_total",
        "Documents dead-lettered after a permanent extraction failure"
    ))
    .expect("Can't create a metric");
    pub static ref DOCUMENTS_NACKED_TOTAL: IntCounter = register_int_counter!(opts!(
        "lake_documents_nacked_total",
        "Work-queue messages returned to the queue for another attempt"
    ))
    .expect("Can't create a metric");
    pub static ref DEAD_LETTER_QUEUE_SIZE: IntGauge = register_int_gauge!(opts!(
        "lake_dead_letter_queue_size",
        "Current count of dead-lettered work-queue messages"
    ))
    .expect("Can't create a metric");
    pub static ref ORCHESTRATOR_RUN_DURATION_SECONDS: Histogram = register_histogram!(
        "lake_orchestrator_run_duration_seconds",
        "Wall-clock time for one CheckUpdate..UpdateWatermark run of a (source, year)",
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
    )
    .expect("Can't create a metric");
    pub static ref QUALITY_GATE_VIOLATION_FRACTION: IntGauge = register_int_gauge!(opts!(
        "lake_quality_gate_violation_fraction_ppm",
        "Most recent quality-gate violation fraction, in parts per million"
    ))
    .expect("Can't create a metric");
}

/// Emits every metric's current value as one structured log line. There is no inbound
/// HTTP surface in this system (§6 "Inbound is pull-based") to host a `/metrics` route, so
/// the `run` loop calls this once per tick instead of exposing a scrape endpoint.
pub fn log_snapshot() {
    tracing::info!(
        documents_extracted_total = DOCUMENTS_EXTRACTED_TOTAL.get(),
        documents_failed_total = DOCUMENTS_FAILED_TOTAL.get(),
        documents_nacked_total = DOCUMENTS_NACKED_TOTAL.get(),
        dead_letter_queue_size = DEAD_LETTER_QUEUE_SIZE.get(),
        quality_gate_violation_fraction_ppm = QUALITY_GATE_VIOLATION_FRACTION.get(),
        "metrics snapshot"
    );
}

//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start a Prometheus scrape listener on `addr` and install the recorder.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Queue metrics
    pub const QUEUE_DEPTH: &str = "vscan_queue_depth";
    pub const MESSAGES_RECEIVED_TOTAL: &str = "vscan_messages_received_total";
    pub const MESSAGES_DISCARDED_TOTAL: &str = "vscan_messages_discarded_total";

    // Job metrics
    pub const JOBS_COMPLETED_TOTAL: &str = "vscan_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vscan_jobs_failed_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "vscan_jobs_skipped_total";
    pub const LEASES_RECOVERED_TOTAL: &str = "vscan_leases_recovered_total";

    // Pipeline metrics
    pub const SEGMENTS_TRANSCRIBED_TOTAL: &str = "vscan_segments_transcribed_total";
    pub const SEGMENTS_FAILED_TOTAL: &str = "vscan_segments_failed_total";
}

pub fn set_queue_depth(depth: u64) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}

pub fn record_message_received() {
    counter!(names::MESSAGES_RECEIVED_TOTAL).increment(1);
}

pub fn record_message_discarded() {
    counter!(names::MESSAGES_DISCARDED_TOTAL).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

/// Record job failed, labelled by the pipeline stage that failed.
pub fn record_job_failed(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record a message skipped because its video already has a result.
pub fn record_job_skipped() {
    counter!(names::JOBS_SKIPPED_TOTAL).increment(1);
}

pub fn record_leases_recovered(count: usize) {
    counter!(names::LEASES_RECOVERED_TOTAL).increment(count as u64);
}

pub fn record_segment(transcribed: bool) {
    if transcribed {
        counter!(names::SEGMENTS_TRANSCRIBED_TOTAL).increment(1);
    } else {
        counter!(names::SEGMENTS_FAILED_TOTAL).increment(1);
    }
}

//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_TOTAL: &str = "reel_jobs_total";
    pub const JOB_DURATION_SECONDS: &str = "reel_job_duration_seconds";
    pub const JOBS_IN_FLIGHT: &str = "reel_jobs_in_flight";
    pub const JOBS_ENQUEUED_TOTAL: &str = "reel_jobs_enqueued_total";
    pub const STATUS_WRITE_FAILURES_TOTAL: &str = "reel_status_write_failures_total";
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Record a job reaching an end state (`completed`, `failed`, `skipped`, `error`).
pub fn record_job(result: &'static str, duration_secs: f64) {
    counter!(names::JOBS_TOTAL, "result" => result).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "result" => result).record(duration_secs);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_enqueued() {
    counter!(names::JOBS_ENQUEUED_TOTAL).increment(1);
}

pub fn record_status_write_failure(status: &'static str) {
    counter!(names::STATUS_WRITE_FAILURES_TOTAL, "status" => status).increment(1);
}

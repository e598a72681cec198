//! Pipeline metrics.
//!
//! Counters and a latency histogram recorded through the `metrics` facade.
//! Without an installed recorder every call is a no-op.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use reelgen_models::Stage;

use crate::error::ConfigError;

/// Metric name constants for consistency.
pub mod names {
    pub const STAGE_COMPLETED_TOTAL: &str = "reelgen_stage_completed_total";
    pub const STAGE_FAILED_TOTAL: &str = "reelgen_stage_failed_total";
    pub const STAGE_DURATION_SECONDS: &str = "reelgen_stage_duration_seconds";
    pub const ATTEMPTS_RETRIED_TOTAL: &str = "reelgen_attempts_retried_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "reelgen_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "reelgen_jobs_failed_total";
}

/// Serve Prometheus metrics on `0.0.0.0:{port}`. Must run inside a Tokio
/// runtime.
pub fn install_exporter(port: u16) -> Result<(), ConfigError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
        .map_err(|e| ConfigError::Invalid(format!("metrics exporter on port {}: {}", port, e)))
}

pub fn record_stage_completed(stage: Stage, duration_secs: f64) {
    counter!(names::STAGE_COMPLETED_TOTAL, "stage" => stage.as_str()).increment(1);
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(duration_secs);
}

pub fn record_stage_failed(stage: Stage) {
    counter!(names::STAGE_FAILED_TOTAL, "stage" => stage.as_str()).increment(1);
}

pub fn record_attempt_retried(stage: Stage) {
    counter!(names::ATTEMPTS_RETRIED_TOTAL, "stage" => stage.as_str()).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(stage: Stage, retryable: bool) {
    counter!(
        names::JOBS_FAILED_TOTAL,
        "stage" => stage.as_str(),
        "retryable" => if retryable { "true" } else { "false" }
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::STAGE_COMPLETED_TOTAL.starts_with("reelgen_"));
        assert!(names::STAGE_DURATION_SECONDS.ends_with("_seconds"));
        assert!(names::JOBS_FAILED_TOTAL.ends_with("_total"));
    }

    #[tokio::test]
    async fn test_second_exporter_is_a_config_error() {
        install_exporter(0).unwrap();
        let err = install_exporter(0).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("metrics exporter")));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_stage_completed(Stage::Script, 1.5);
        record_stage_failed(Stage::Audio);
        record_job_failed(Stage::Render, false);
    }
}

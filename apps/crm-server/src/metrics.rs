//! Prometheus metrics for crm-server.
//!
//! Exposed in Prometheus text format at `/metrics` on the health listener.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus recorder. Call once at startup, before anything is recorded.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        "crm_grpc_requests_total",
        "Total number of gRPC requests processed"
    );
    describe_histogram!(
        "crm_grpc_request_duration_seconds",
        "Duration of gRPC requests in seconds"
    );
    describe_counter!(
        "crm_grpc_errors_total",
        "Total number of failed gRPC requests by error kind"
    );

    Ok(handle)
}

pub fn record_grpc_request(method: &'static str, duration: std::time::Duration) {
    counter!("crm_grpc_requests_total", "method" => method, "status" => "ok").increment(1);
    histogram!("crm_grpc_request_duration_seconds", "method" => method)
        .record(duration.as_secs_f64());
}

pub fn record_grpc_error(method: &'static str, code: &'static str, duration: std::time::Duration) {
    counter!("crm_grpc_requests_total", "method" => method, "status" => "error").increment(1);
    counter!("crm_grpc_errors_total", "method" => method, "code" => code).increment(1);
    histogram!("crm_grpc_request_duration_seconds", "method" => method)
        .record(duration.as_secs_f64());
}

/// Times one request and records it on completion.
pub struct RequestTimer {
    method: &'static str,
    start: Instant,
}

impl RequestTimer {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            start: Instant::now(),
        }
    }

    pub fn success(self) {
        record_grpc_request(self.method, self.start.elapsed());
    }

    pub fn error(self, code: &'static str) {
        record_grpc_error(self.method, code, self.start.elapsed());
    }
}

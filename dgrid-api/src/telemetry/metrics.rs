//! Prometheus Metrics Definitions
//!
//! Defines all DGRID metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Record operation latency buckets (seconds)
const OPERATION_LATENCY_BUCKETS: &[f64] =
    &[0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<DgridMetrics>> = Lazy::new(DgridMetrics::new);

/// Container for all DGRID metrics.
#[derive(Clone)]
pub struct DgridMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Dispatched operation counter - labels: operation, outcome
    pub operations_total: CounterVec,

    /// Dispatched operation duration histogram - labels: operation
    pub operation_duration_seconds: HistogramVec,

    /// Cache calls that faulted
    pub cache_faults_total: Counter,

    /// Cache handles obtained from a manager
    pub cache_handle_acquisitions_total: Counter,

    /// Cache handles dropped after a fault or manager change
    pub cache_handle_invalidations_total: Counter,
}

impl DgridMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "dgrid_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "dgrid_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            operations_total: register_counter_vec!(
                "dgrid_operations_total",
                "Total number of dispatched record operations",
                &["operation", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register operations_total: {}", e)))?,

            operation_duration_seconds: register_histogram_vec!(
                "dgrid_operation_duration_seconds",
                "Record operation duration in seconds",
                &["operation"],
                OPERATION_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register operation_duration_seconds: {}", e)))?,

            cache_faults_total: register_counter!(
                "dgrid_cache_faults_total",
                "Total number of faulted cache calls"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_faults_total: {}", e)))?,

            cache_handle_acquisitions_total: register_counter!(
                "dgrid_cache_handle_acquisitions_total",
                "Total number of cache handles obtained from a cache manager"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_handle_acquisitions_total: {}", e)))?,

            cache_handle_invalidations_total: register_counter!(
                "dgrid_cache_handle_invalidations_total",
                "Total number of cache handles dropped"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_handle_invalidations_total: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a dispatched operation and its outcome.
    pub fn record_operation(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn cache_fault(&self) {
        self.cache_faults_total.inc();
    }

    pub fn handle_acquired(&self) {
        self.cache_handle_acquisitions_total.inc();
    }

    pub fn handle_invalidated(&self) {
        self.cache_handle_invalidations_total.inc();
    }
}

/// Run `f` against the global metrics, skipping it if registration failed.
pub fn with_metrics(f: impl FnOnce(&DgridMetrics)) {
    match METRICS.as_ref() {
        Ok(metrics) => f(metrics),
        Err(e) => tracing::trace!(error = %e, "Metrics unavailable"),
    }
}

/// Axum handler for the /metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.operations_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_operation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let before = metrics
            .operations_total
            .with_label_values(&["get", "not_found"])
            .get();
        metrics.record_operation("get", "not_found", 0.002);
        let after = metrics
            .operations_total
            .with_label_values(&["get", "not_found"])
            .get();
        assert!(after >= before + 1.0);
        Ok(())
    }

    #[test]
    fn test_handle_counters() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let before = metrics.cache_handle_acquisitions_total.get();
        with_metrics(|m| m.handle_acquired());
        assert!(metrics.cache_handle_acquisitions_total.get() >= before + 1.0);
        Ok(())
    }
}

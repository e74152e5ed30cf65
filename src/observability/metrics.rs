//! Prometheus metric registration.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Standard Prometheus histogram buckets for request latency.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the global recorder and return the handle rendered at /metrics.
pub fn install() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("apigw_http_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )?
        .install_recorder()?;

    metrics::describe_counter!(
        "apigw_http_requests_total",
        "Total HTTP requests processed by the gateway"
    );
    metrics::describe_histogram!(
        "apigw_http_request_duration_seconds",
        "HTTP request latency"
    );
    metrics::describe_counter!(
        "apigw_rate_limiter_errors_total",
        "Rate limiter backend failures absorbed by failing open"
    );

    Ok(handle)
}

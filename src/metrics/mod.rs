use crate::health::Status;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!("health_checks_total", "Health checks performed, by outcome");
    describe_histogram!(
        "health_check_duration_seconds",
        "Time spent waiting on health probes"
    );
    describe_gauge!(
        "service_status",
        "Service status (1=healthy, 0.5=degraded, 0=unhealthy, -1=unknown/maintenance)"
    );
    describe_gauge!("backend_pool_connections", "Live backend connection handles");
    describe_counter!("backend_pool_overflow_total", "Connection requests served by sharing a handle");
    describe_counter!("backend_retries_total", "Backend operations retried after a failure");
    describe_counter!("query_cache_hits_total", "Reads served from the query cache");
    describe_counter!("query_cache_misses_total", "Reads that went to the backend");
    describe_counter!("mock_responses_total", "Responses served from synthetic data");
    describe_counter!("mock_failures_total", "Simulated failures injected into mock calls");
}

/// Start Prometheus metrics server on given address
pub fn start_metrics_server(addr: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: std::net::SocketAddr = addr.parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    init_metrics();

    Ok(())
}

pub struct Metrics;

impl Metrics {
    #[inline]
    pub fn record_health_check(service: &str, outcome: &'static str, duration: Duration) {
        let labels = [("service", service.to_string()), ("outcome", outcome.to_string())];
        counter!("health_checks_total", &labels).increment(1);
        histogram!("health_check_duration_seconds", "service" => service.to_string())
            .record(duration.as_secs_f64());
    }

    #[inline]
    pub fn set_service_status(service: &str, status: Status) {
        gauge!("service_status", "service" => service.to_string()).set(status.as_gauge());
    }

    #[inline]
    pub fn record_pool_size(size: usize) {
        gauge!("backend_pool_connections").set(size as f64);
    }

    #[inline]
    pub fn record_pool_overflow(key: &str) {
        counter!("backend_pool_overflow_total", "key" => key.to_string()).increment(1);
    }

    #[inline]
    pub fn record_retry() {
        counter!("backend_retries_total").increment(1);
    }

    #[inline]
    pub fn record_cache_lookup(table: &str, hit: bool) {
        let name = if hit {
            "query_cache_hits_total"
        } else {
            "query_cache_misses_total"
        };
        counter!(name, "table" => table.to_string()).increment(1);
    }

    #[inline]
    pub fn record_mock_response(key: &str) {
        counter!("mock_responses_total", "operation" => operation_label(key)).increment(1);
    }

    #[inline]
    pub fn record_mock_failure(key: &str) {
        counter!("mock_failures_total", "operation" => operation_label(key)).increment(1);
    }
}

/// Strip ids from interceptor keys so label cardinality stays bounded.
fn operation_label(key: &str) -> String {
    key.split(':').next().unwrap_or(key).to_string()
}

//! Metrics collection and exposition.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize the Prometheus exporter and scrape endpoint, and start the
/// uptime ticker.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tokio::spawn(async {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            counter!("uptime").increment(1);
        }
    });

    tracing::info!("Metrics server listening on http://{}", addr);
}

/// Record one dispatched request.
pub fn record_api_request(ret_code: i64, action: &str, method: &str, uri: &str, start: Instant) {
    let labels = [
        ("ret_code", ret_code.to_string()),
        ("action", action.to_string()),
        ("method", method.to_string()),
        ("uri", uri.to_string()),
    ];

    counter!("http_request_count_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

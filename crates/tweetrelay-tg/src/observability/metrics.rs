use super::GLOBAL_LABELS;
use crate::config::from_env_or_panic;
use crate::prelude::*;
use serde::Deserialize;
use std::net::SocketAddr;

/// Histogram buckets to measure the distribution of request durations in seconds
pub(crate) const DEFAULT_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

#[derive(Deserialize)]
struct MetricsConfig {
    metrics_addr: Option<SocketAddr>,
}

/// Installs the Prometheus exporter if `METRICS_ADDR` is set. Otherwise
/// the metrics are recorded into the void.
pub fn init_metrics() {
    let config: MetricsConfig = from_env_or_panic("");

    let Some(addr) = config.metrics_addr else {
        info!("METRICS_ADDR is not set, metrics exporter is disabled");
        return;
    };

    let mut builder = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(DEFAULT_DURATION_BUCKETS)
        .expect("BUG: default buckets must not be empty");

    for (key, value) in GLOBAL_LABELS {
        builder = builder.add_global_label(*key, *value);
    }

    builder
        .install()
        .expect("BUG: failed to initialize the metrics listener");

    describe_metrics();

    info!(%addr, "Metrics exporter is listening");
}

fn describe_metrics() {
    metrics::describe_counter!(
        "tg_updates_total",
        "Number of updates received from Telegram"
    );
    metrics::describe_counter!(
        "relay_cycles_total",
        "Number of relay cycles, labeled by their outcome"
    );
    metrics::describe_counter!(
        "relay_posts_total",
        "Number of posts forwarded to the channel"
    );
    metrics::describe_counter!(
        "relay_account_errors_total",
        "Number of times relaying posts of an account failed"
    );
    metrics::describe_histogram!(
        "relay_cycle_duration_seconds",
        metrics::Unit::Seconds,
        "Duration of a full pass over all watched accounts"
    );
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        metrics::Unit::Seconds,
        "Duration of a single HTTP request including retries"
    );
}

//! Logging and metrics setup

use cqi9_common::config::ObservabilityConfig;
use cqi9_common::metrics::{register_metrics, LATENCY_BUCKETS, METRICS_PREFIX, UPSTREAM_BUCKETS};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the tracing subscriber. Output goes to stderr so that CLI
/// commands can print JSON on stdout.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info,sqlx=warn", config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logging {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("Tracing already initialized: {}", e);
    }
}

/// Start the Prometheus exporter on `observability.metrics_port`; port 0 disables it
pub fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        tracing::info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?;
    for upstream in ["llm_duration_seconds", "extraction_duration_seconds"] {
        builder = builder.set_buckets_for_metric(
            Matcher::Full(format!("{}_{}", METRICS_PREFIX, upstream)),
            UPSTREAM_BUCKETS,
        )?;
    }
    builder.install()?;

    register_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(log_level: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Initialize Prometheus metrics exporter
pub fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    describe_metrics();

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(
        "webapp_health_probes_total",
        "Health probes by resulting status"
    );
    metrics::describe_counter!("webapp_uploads_total", "Upload attempts by outcome");
    metrics::describe_counter!("webapp_deletes_total", "Delete attempts by outcome");
    metrics::describe_counter!(
        "webapp_inconsistencies_total",
        "Object/record pairs left out of sync, requiring manual repair"
    );
    metrics::describe_histogram!(
        "webapp_operation_duration_seconds",
        metrics::Unit::Seconds,
        "Latency of health probes, uploads and deletes"
    );
}

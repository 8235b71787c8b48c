use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use webapp_service::telemetry::{init_metrics, init_tracing};
use webapp_service::{
    serve_until, AppState, Config, HealthProber, PgMetadataStore, S3ObjectStore,
    UploadOrchestrator,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, config.service.json_logs);

    info!(
        service = %config.service.name,
        "Starting webapp service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let metadata_store = Arc::new(
        PgMetadataStore::new(&config.database)
            .await
            .context("Failed to initialize metadata store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 object store")?,
    );

    let store_timeout = config.store_timeout();
    let api_state = AppState {
        uploads: Arc::new(UploadOrchestrator::new(
            object_store,
            metadata_store.clone(),
            store_timeout,
        )),
        prober: Arc::new(HealthProber::new(metadata_store, store_timeout)),
        upload_field: Arc::from(config.api.upload_field.as_str()),
    };

    info!("Webapp service started successfully");

    // Serve until a shutdown signal, letting in-flight requests finish
    let served = serve_until(api_state, config.api.clone(), shutdown_signal()).await;
    if let Err(ref e) = served {
        error!(error = %format!("{e:#}"), "API server error");
    }

    info!("Webapp service stopped");

    served
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

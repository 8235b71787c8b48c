//! Database liveness probe.
//!
//! A probe writes one row into `health_checks`. It never retries: the poller
//! calling `/healthz` owns the retry schedule.

use crate::metadata_store::MetadataStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Binary liveness result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Up,
    Down,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Up => "up",
            HealthStatus::Down => "down",
        }
    }
}

pub struct HealthProber {
    metadata_store: Arc<dyn MetadataStore>,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(metadata_store: Arc<dyn MetadataStore>, timeout: Duration) -> Self {
        Self {
            metadata_store,
            timeout,
        }
    }

    /// Attempt exactly one health check insert.
    pub async fn probe(&self) -> HealthStatus {
        let started = Instant::now();

        let status = match tokio::time::timeout(
            self.timeout,
            self.metadata_store.record_health_check(),
        )
        .await
        {
            Ok(Ok(check)) => {
                debug!(check_id = check.check_id, "Health check recorded");
                HealthStatus::Up
            }
            Ok(Err(e)) => {
                warn!(error = %format!("{e:#}"), "Health check insert failed");
                HealthStatus::Down
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Health check insert timed out");
                HealthStatus::Down
            }
        };

        metrics::counter!("webapp_health_probes_total", "status" => status.as_str()).increment(1);
        metrics::histogram!("webapp_operation_duration_seconds", "operation" => "health_probe")
            .record(started.elapsed().as_secs_f64());

        status
    }
}

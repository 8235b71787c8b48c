//! Webapp Service
//!
//! Two small HTTP APIs in front of PostgreSQL and S3:
//!
//! - `GET /healthz` writes one row into `health_checks` and answers 200 or 503.
//! - `/v1/file` stores uploaded files in S3 and their metadata in `images`.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum)
//! ┌──────────────┐      ┌──────────────┐      ┌──────────────┐
//! │ /healthz     │─────▶│ Health       │─────▶│ PostgreSQL   │
//! └──────────────┘      │ Prober       │      │ health_checks│
//!                       └──────────────┘      │ images       │
//! ┌──────────────┐      ┌──────────────┐      └──────────────┘
//! │ /v1/file     │─────▶│ Upload       │─────────────▲
//! └──────────────┘      │ Orchestrator │      ┌──────────────┐
//!                       └──────────────┘─────▶│ S3 bucket    │
//!                                             │ {id}/{name}  │
//!                                             └──────────────┘
//! ```
//!
//! The orchestrator keeps "a row exists iff its object exists" across the two
//! stores; see [`uploads`] for the ordering and compensation rules.

pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod metadata_store;
pub mod object_store;
pub mod telemetry;
pub mod uploads;

#[cfg(test)]
mod test_support;

pub use api::{create_router, serve_until, start_api_server, AppState};
pub use config::Config;
pub use error::{InconsistencyKind, ServiceError};
pub use health::{HealthProber, HealthStatus};
pub use metadata_store::{HealthCheck, ImageRecord, MetadataStore, PgMetadataStore};
pub use object_store::{ObjectStore, PutObject, S3ObjectStore};
pub use uploads::{NewUpload, UploadOrchestrator, UploadedImage};

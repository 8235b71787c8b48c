use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Metadata row describing one stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ImageRecord {
    /// Identifier, also the first segment of the object key
    pub id: Uuid,
    /// Server-assigned UTC date of the upload
    pub upload_date: NaiveDate,
    /// Fully-qualified object URL
    pub url: String,
    /// File name as supplied by the client
    pub file_name: String,
    /// Object key inside the bucket
    pub object_key: String,
}

/// Liveness audit row written by every successful health probe
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HealthCheck {
    pub check_id: i64,
    pub checked_at: DateTime<Utc>,
}

/// Relational storage for image metadata and health probe rows
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new image record
    async fn insert_image(&self, record: &ImageRecord) -> Result<()>;

    /// Get an image record by ID
    async fn get_image(&self, id: Uuid) -> Result<Option<ImageRecord>>;

    /// Delete an image record, returning whether a row was removed
    async fn delete_image(&self, id: Uuid) -> Result<bool>;

    /// Append one health check row
    async fn record_health_check(&self) -> Result<HealthCheck>;
}

/// PostgreSQL metadata store
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self, record), fields(image_id = %record.id))]
    async fn insert_image(&self, record: &ImageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO images (id, upload_date, url, file_name, object_key)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.upload_date)
        .bind(&record.url)
        .bind(&record.file_name)
        .bind(&record.object_key)
        .execute(&self.pool)
        .await
        .context("Failed to insert image metadata")?;

        debug!(image_id = %record.id, object_key = %record.object_key, "Image indexed");
        Ok(())
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<ImageRecord>> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, upload_date, url, file_name, object_key
            FROM images
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query image")?;

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn delete_image(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete image metadata")?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_health_check(&self) -> Result<HealthCheck> {
        let check = sqlx::query_as::<_, HealthCheck>(
            r#"
            INSERT INTO health_checks (checked_at)
            VALUES (NOW())
            RETURNING check_id, checked_at
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert health check")?;

        Ok(check)
    }
}

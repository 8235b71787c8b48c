//! Upload orchestration across the object store and the metadata store.
//!
//! The two stores cannot commit together, so every operation is ordered to
//! keep "a row exists iff its object exists":
//!
//! - create writes the object first, then the row; a failed row insert is
//!   compensated by deleting the object again.
//! - delete removes the object first, then the row; a failure in between
//!   leaves a detectable dangling row rather than an invisible orphaned object.
//! - a timed-out write has an unknown outcome and is treated as if it landed:
//!   a timed-out put deletes the key, a timed-out insert deletes the row
//!   before the object.
//!
//! When a cleanup step itself fails the result is
//! [`ServiceError::Inconsistency`], which is logged and counted separately.

use crate::error::{InconsistencyKind, ServiceError, ServiceResult};
use crate::metadata_store::{ImageRecord, MetadataStore};
use crate::object_store::{content_type_for, object_key, ObjectStore, PutObject};
use anyhow::anyhow;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Longest file name accepted, matching the `images.file_name` column
pub const MAX_FILE_NAME_LEN: usize = 255;

/// File payload received from a client
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub file_name: String,
    /// Content type declared by the client, if any
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Result of a committed upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedImage {
    pub record: ImageRecord,
    pub content_type: String,
}

pub struct UploadOrchestrator {
    object_store: Arc<dyn ObjectStore>,
    metadata_store: Arc<dyn MetadataStore>,
    store_timeout: Duration,
}

impl UploadOrchestrator {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        metadata_store: Arc<dyn MetadataStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            object_store,
            metadata_store,
            store_timeout,
        }
    }

    /// Store a new file and its metadata row.
    #[instrument(skip(self, upload), fields(file_name = %upload.file_name, size_bytes = upload.bytes.len()))]
    pub async fn upload(&self, upload: NewUpload) -> ServiceResult<UploadedImage> {
        let started = Instant::now();
        let result = self.upload_inner(upload).await;
        record_outcome("upload", started, &result);
        result
    }

    async fn upload_inner(&self, upload: NewUpload) -> ServiceResult<UploadedImage> {
        validate_file_name(&upload.file_name)?;

        let id = Uuid::new_v4();
        let key = object_key(&id, &upload.file_name);
        let upload_date = Utc::now().date_naive();
        let content_type = upload
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| content_type_for(&upload.file_name));

        let metadata = HashMap::from([
            ("upload_date".to_string(), upload_date.format("%Y-%m-%d").to_string()),
            ("filename".to_string(), upload.file_name.clone()),
            ("file_type".to_string(), content_type.clone()),
            ("file_path".to_string(), key.clone()),
            ("file_id".to_string(), id.to_string()),
        ]);

        let object = PutObject {
            key: key.clone(),
            body: upload.bytes,
            content_type: content_type.clone(),
            metadata,
        };
        match self.attempt(self.object_store.put(object)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(ServiceError::Dependency(e.context("object_store.put"))),
            // The object may have been written without the write being acknowledged
            None => {
                let put_err = self.timed_out("object_store.put");
                return Err(self.remove_object(&key, put_err).await);
            }
        }

        let record = ImageRecord {
            id,
            upload_date,
            url: self.object_store.object_url(&key),
            file_name: upload.file_name,
            object_key: key,
        };

        match self.attempt(self.metadata_store.insert_image(&record)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                let insert_err = ServiceError::Dependency(e.context("metadata_store.insert_image"));
                return Err(self.remove_object(&record.object_key, insert_err).await);
            }
            None => {
                let insert_err = self.timed_out("metadata_store.insert_image");
                return Err(self.revert_unacknowledged_insert(&record, insert_err).await);
            }
        }

        info!(
            image_id = %record.id,
            object_key = %record.object_key,
            operation = "upload",
            "File uploaded"
        );

        Ok(UploadedImage {
            record,
            content_type,
        })
    }

    /// Remove the object written by a failed upload and classify the failure.
    async fn remove_object(&self, key: &str, upload_err: ServiceError) -> ServiceError {
        warn!(
            object_key = %key,
            error = %upload_err,
            "Upload failed after the object may have been written, deleting object"
        );

        match self
            .call("object_store.delete", self.object_store.delete(key))
            .await
        {
            Ok(()) => upload_err,
            Err(delete_err) => {
                let cause = anyhow!("{delete_err}")
                    .context(format!("compensating delete failed after upload error: {upload_err}"));
                inconsistency(InconsistencyKind::OrphanedObject, key, cause)
            }
        }
    }

    /// An unacknowledged insert may still have committed: drop the row, then the object.
    ///
    /// If the row cannot be removed its object is kept, so a committed row never
    /// loses its object.
    async fn revert_unacknowledged_insert(
        &self,
        record: &ImageRecord,
        insert_err: ServiceError,
    ) -> ServiceError {
        match self
            .call("metadata_store.delete_image", self.metadata_store.delete_image(record.id))
            .await
        {
            Ok(_) => self.remove_object(&record.object_key, insert_err).await,
            Err(delete_err) => {
                let cause = anyhow!("{delete_err}").context(format!(
                    "metadata insert outcome unknown and row could not be reverted: {insert_err}"
                ));
                inconsistency(InconsistencyKind::OrphanedObject, &record.object_key, cause)
            }
        }
    }

    /// Fetch the metadata record for an id string.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> ServiceResult<ImageRecord> {
        let id = parse_id(id)?;
        self.find(id).await
    }

    /// Delete the object, then its metadata record.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> ServiceResult<()> {
        let started = Instant::now();
        let result = self.delete_inner(id).await;
        record_outcome("delete", started, &result);
        result
    }

    async fn delete_inner(&self, id: &str) -> ServiceResult<()> {
        let id = parse_id(id)?;
        let record = self.find(id).await?;

        self.call(
            "object_store.delete",
            self.object_store.delete(&record.object_key),
        )
        .await?;

        match self
            .call("metadata_store.delete_image", self.metadata_store.delete_image(id))
            .await
        {
            Ok(_) => {
                info!(
                    image_id = %id,
                    object_key = %record.object_key,
                    operation = "delete",
                    "File deleted"
                );
                Ok(())
            }
            Err(e) => Err(inconsistency(
                InconsistencyKind::DanglingRecord,
                &record.object_key,
                anyhow!("{e}").context("metadata delete failed after object delete"),
            )),
        }
    }

    async fn find(&self, id: Uuid) -> ServiceResult<ImageRecord> {
        self.call("metadata_store.get_image", self.metadata_store.get_image(id))
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Run one store call under the configured timeout; `None` means it timed out.
    async fn attempt<T, F>(&self, fut: F) -> Option<anyhow::Result<T>>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        tokio::time::timeout(self.store_timeout, fut).await.ok()
    }

    /// Run one store call under the configured timeout.
    async fn call<T, F>(&self, operation: &'static str, fut: F) -> ServiceResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match self.attempt(fut).await {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(ServiceError::Dependency(e.context(operation))),
            None => Err(self.timed_out(operation)),
        }
    }

    fn timed_out(&self, operation: &'static str) -> ServiceError {
        ServiceError::Dependency(anyhow!(
            "{operation} timed out after {:?}",
            self.store_timeout
        ))
    }
}

fn validate_file_name(file_name: &str) -> ServiceResult<()> {
    if file_name.trim().is_empty() {
        return Err(ServiceError::client("Bad Request"));
    }
    if file_name.chars().count() > MAX_FILE_NAME_LEN {
        return Err(ServiceError::client("File name too long"));
    }
    Ok(())
}

fn parse_id(id: &str) -> ServiceResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| ServiceError::client("Invalid UUID"))
}

fn inconsistency(kind: InconsistencyKind, object_key: &str, cause: anyhow::Error) -> ServiceError {
    error!(
        inconsistency = kind.as_str(),
        object_key = %object_key,
        error = %format!("{cause:#}"),
        "Object store and metadata store are out of sync, manual remediation required"
    );
    metrics::counter!("webapp_inconsistencies_total", "kind" => kind.as_str()).increment(1);

    ServiceError::Inconsistency {
        kind,
        object_key: object_key.to_string(),
        cause,
    }
}

fn record_outcome<T>(operation: &'static str, started: Instant, result: &ServiceResult<T>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(ServiceError::Client(_)) => "rejected",
        Err(ServiceError::NotFound) => "not_found",
        Err(ServiceError::Dependency(_)) => "dependency_error",
        Err(ServiceError::Inconsistency { .. }) => "inconsistent",
    };

    let name = match operation {
        "upload" => "webapp_uploads_total",
        _ => "webapp_deletes_total",
    };
    metrics::counter!(name, "outcome" => outcome).increment(1);
    metrics::histogram!("webapp_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

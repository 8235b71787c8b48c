use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Object written to the store together with its descriptive metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PutObject {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    /// Stored as user metadata on the object itself
    pub metadata: HashMap<String, String>,
}

/// Key-addressed binary storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any previous one under the same key
    async fn put(&self, object: PutObject) -> Result<()>;

    /// Remove an object; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Fully-qualified URL under which the object is addressed
    fn object_url(&self, key: &str) -> String;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    url_base: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());
        let url_base = object_url_base(config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            url_base = %url_base,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            url_base,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, object), fields(object_key = %object.key, size_bytes = object.body.len()))]
    async fn put(&self, object: PutObject) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object.key)
            .content_type(&object.content_type);

        for (name, value) in &object.metadata {
            request = request.metadata(name, value);
        }

        request
            .body(ByteStream::from(object.body))
            .send()
            .await
            .context("Failed to upload object to S3")?;

        debug!(object_key = %object.key, "Object uploaded to S3");
        Ok(())
    }

    #[instrument(skip(self), fields(object_key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to delete object from S3")?;

        debug!(object_key = %key, "Object deleted from S3");
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_base, key)
    }
}

/// Base URL objects are published under, without a trailing slash.
///
/// An explicit `public_url_base` wins; a custom path-style endpoint yields
/// `{endpoint}/{bucket}`; otherwise the virtual-hosted AWS form is used.
fn object_url_base(config: &S3Config) -> String {
    if let Some(ref base) = config.public_url_base {
        return base.trim_end_matches('/').to_string();
    }

    match config.endpoint_url {
        Some(ref endpoint) if config.force_path_style => {
            format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket)
        }
        _ => format!("https://{}.s3.amazonaws.com", config.bucket),
    }
}

/// Build the object key `{id}/{file_name}`, neutralising path separators in the name
pub fn object_key(id: &uuid::Uuid, file_name: &str) -> String {
    format!("{}/{}", id, sanitize_file_name(file_name))
}

/// Sanitize a file name to prevent path traversal
fn sanitize_file_name(file_name: &str) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    // "." and ".." are still traversal segments after the character pass
    if sanitized.chars().all(|c| c == '.') {
        sanitized.replace('.', "_")
    } else {
        sanitized
    }
}

/// Guess a content type from the file extension
pub fn content_type_for(file_name: &str) -> String {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "webp" => "image/webp".to_string(),
        "bmp" => "image/bmp".to_string(),
        "gif" => "image/gif".to_string(),
        "txt" => "text/plain".to_string(),
        "pdf" => "application/pdf".to_string(),
        "json" => "application/json".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

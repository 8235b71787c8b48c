use crate::config::ApiConfig;
use crate::error::ServiceError;
use crate::health::{HealthProber, HealthStatus};
use crate::metadata_store::ImageRecord;
use crate::uploads::{NewUpload, UploadOrchestrator, UploadedImage};
use anyhow::{bail, Context, Result};
use axum::{
    body::{Body, HttpBody},
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadOrchestrator>,
    pub prober: Arc<HealthProber>,
    /// Multipart field carrying the file
    pub upload_field: Arc<str>,
}

/// Response for a created upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file_name: String,
    pub id: Uuid,
    pub url: String,
    pub upload_date: NaiveDate,
    pub image_type: String,
}

impl From<UploadedImage> for UploadResponse {
    fn from(u: UploadedImage) -> Self {
        Self {
            file_name: u.record.file_name,
            id: u.record.id,
            url: u.record.url,
            upload_date: u.record.upload_date,
            image_type: u.content_type,
        }
    }
}

/// Image metadata in API responses
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub file_name: String,
    pub id: Uuid,
    pub url: String,
    pub upload_date: NaiveDate,
}

impl From<ImageRecord> for ImageResponse {
    fn from(r: ImageRecord) -> Self {
        Self {
            file_name: r.file_name,
            id: r.id,
            url: r.url,
            upload_date: r.upload_date,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// JSON error returned by the file endpoints
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Bad Request")
    }

    fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed.")
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found")
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Client(message) => ApiError::new(StatusCode::BAD_REQUEST, message),
            ServiceError::NotFound => ApiError::not_found(),
            ServiceError::Dependency(e) => {
                error!(error = %format!("{e:#}"), "Store operation failed");
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            }
            // Already escalated where the inconsistency was detected
            ServiceError::Inconsistency { .. } => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        debug!(error = %err, "Failed to read multipart body");
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
        } else {
            ApiError::bad_request()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let router = Router::new()
        .route("/healthz", any(healthz))
        .route("/cicd/", any(healthz))
        .route(
            "/v1/file",
            post(upload_file)
                .get(file_collection_bad_request)
                .delete(file_collection_bad_request)
                .fallback(method_not_allowed)
                .layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route(
            "/v1/file/:id",
            get(get_file)
                .delete(delete_file)
                .fallback(method_not_allowed),
        )
        .fallback(unknown_route)
        .layer(TraceLayer::new_for_http());

    // A CORS layer answers every OPTIONS request as a preflight
    let router = match cors_layer(config) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

fn cors_layer(config: &ApiConfig) -> Option<CorsLayer> {
    if !config.cors_enabled {
        return None;
    }

    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    Some(cors.allow_methods(Any).allow_headers(Any))
}

/// Bare status with the headers that keep probes out of caches
fn health_response(status: StatusCode) -> Response {
    (
        status,
        [
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
    )
        .into_response()
}

/// Liveness probe backed by a database write
#[instrument(skip_all, fields(endpoint = "/healthz", operation = "health_probe"))]
async fn healthz(State(state): State<AppState>, method: Method, uri: Uri, body: Body) -> Response {
    if method != Method::GET {
        return health_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    // The body is never read, so its size cannot turn this into a 413
    let has_query = uri.query().is_some_and(|q| !q.is_empty());
    let has_body = !body.is_end_stream();
    if has_query || has_body {
        debug!(has_query, has_body, "Rejecting health probe with payload");
        return health_response(StatusCode::BAD_REQUEST);
    }

    match state.prober.probe().await {
        HealthStatus::Up => health_response(StatusCode::OK),
        HealthStatus::Down => health_response(StatusCode::SERVICE_UNAVAILABLE),
    }
}

/// Store an uploaded file
#[instrument(skip_all, fields(endpoint = "/v1/file", operation = "upload"))]
async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut multipart = multipart.map_err(|e| {
        debug!(error = %e, "Upload is not a multipart request");
        ApiError::bad_request()
    })?;

    let upload = read_upload(&mut multipart, &state.upload_field)
        .await?
        .ok_or_else(ApiError::bad_request)?;

    let uploaded = state.uploads.upload(upload).await?;

    Ok((StatusCode::CREATED, Json(uploaded.into())))
}

/// Take the first file part carrying the configured field name
async fn read_upload(
    multipart: &mut Multipart,
    field_name: &str,
) -> Result<Option<NewUpload>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }
        // Plain form values under the same name are not files
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;

        return Ok(Some(NewUpload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        }));
    }

    Ok(None)
}

async fn file_collection_bad_request() -> ApiError {
    ApiError::bad_request()
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

async fn unknown_route() -> ApiError {
    ApiError::not_found()
}

/// Get single image metadata
#[instrument(skip(state), fields(endpoint = "/v1/file/:id", operation = "get"))]
async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ImageResponse>, ApiError> {
    let record = state.uploads.get(&id).await?;
    Ok(Json(record.into()))
}

/// Delete an image and its metadata
#[instrument(skip(state), fields(endpoint = "/v1/file/:id", operation = "delete"))]
async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.uploads.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start the API server, returning once `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}

/// Serve until `signal` resolves, then drain in-flight requests.
///
/// Returns an error if the server stops before the signal, for example when
/// the listen address cannot be bound.
pub async fn serve_until<S>(state: AppState, config: ApiConfig, signal: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let mut server =
        tokio::spawn(async move { start_api_server(state, &config, server_shutdown).await });

    tokio::select! {
        _ = signal => {
            info!("Draining API server");
            shutdown.cancel();
            server.await.context("API server task panicked")?
        }
        result = &mut server => {
            result
                .context("API server task panicked")?
                .context("API server failed")?;
            bail!("API server stopped before shutdown was requested")
        }
    }
}

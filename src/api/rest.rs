//! REST API Handlers
//!
//! Maps JSON requests from the host framework onto volume driver calls.

use crate::domain::ports::{
    Connector, HostInfo, RequestContext, Snapshot, TerminateOptions, Volume, VolumeDriver,
};
use crate::error::{Error, Result};
use axum::{
    extract::{DefaultBodyLimit, Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use prometheus::{IntCounterVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Where a new volume gets its content from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSource {
    Snapshot(Snapshot),
    Volume(Volume),
}

/// Volume create request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub volume: Volume,
    #[serde(default)]
    pub source: Option<VolumeSource>,
}

/// Volume extend request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendVolumeRequest {
    pub volume: Volume,
    pub new_size_gb: u64,
}

/// Request naming a single volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub volume: Volume,
}

/// Volume migrate request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateVolumeRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    pub volume: Volume,
    pub host: HostInfo,
}

/// Request naming a single snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub snapshot: Snapshot,
}

/// Export request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub context: Option<RequestContext>,
    pub volume: Volume,
}

/// Connection request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub volume: Volume,
    pub connector: Connector,
}

/// Connection teardown request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateConnectionRequest {
    pub volume: Volume,
    pub connector: Connector,
    #[serde(default)]
    pub force: bool,
}

/// Stats query parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

// =============================================================================
// Metrics
// =============================================================================

/// Per-operation request counters
pub struct ApiMetrics {
    operations: IntCounterVec,
}

impl ApiMetrics {
    /// Create the counters and register them on a registry
    pub fn register(registry: &Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "vnx_driver_operations_total",
                "Volume driver operations by outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(|e| Error::Internal(format!("Failed to create metrics: {}", e)))?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(|e| Error::Internal(format!("Failed to register metrics: {}", e)))?;

        Ok(Self { operations })
    }

    fn record(&self, operation: &str, outcome: &str) {
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Current count for an operation and outcome
    pub fn count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome])
            .get()
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    driver: Arc<dyn VolumeDriver>,
    metrics: Arc<ApiMetrics>,
    max_body_size: usize,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(driver: Arc<dyn VolumeDriver>, metrics: Arc<ApiMetrics>) -> Self {
        Self {
            driver,
            metrics,
            max_body_size: 1024 * 1024,
        }
    }

    /// Limit request body size
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            driver: self.driver,
            metrics: self.metrics,
        };

        Router::new()
            // Volume endpoints
            .route("/v1/volumes", post(create_volume))
            .route("/v1/volumes/extend", post(extend_volume))
            .route("/v1/volumes/delete", post(delete_volume))
            .route("/v1/volumes/migrate", post(migrate_volume))
            // Snapshot endpoints
            .route("/v1/snapshots", post(create_snapshot))
            .route("/v1/snapshots/delete", post(delete_snapshot))
            // Export endpoints
            .route("/v1/exports", post(create_export))
            .route("/v1/exports/ensure", post(ensure_export))
            .route("/v1/exports/remove", post(remove_export))
            // Connection endpoints
            .route("/v1/connections/initialize", post(initialize_connection))
            .route("/v1/connections/terminate", post(terminate_connection))
            // Stats endpoint
            .route("/v1/stats", get(get_stats))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(DefaultBodyLimit::max(self.max_body_size))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    driver: Arc<dyn VolumeDriver>,
    metrics: Arc<ApiMetrics>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a volume, optionally from a snapshot or another volume
async fn create_volume(
    State(state): State<AppState>,
    Json(request): Json<CreateVolumeRequest>,
) -> Response {
    info!("Creating volume: {}", request.volume.name);

    let (operation, result) = match &request.source {
        None => (
            "create_volume",
            state.driver.create_volume(&request.volume).await,
        ),
        Some(VolumeSource::Snapshot(snapshot)) => (
            "create_volume_from_snapshot",
            state
                .driver
                .create_volume_from_snapshot(&request.volume, snapshot)
                .await,
        ),
        Some(VolumeSource::Volume(src_vref)) => (
            "create_cloned_volume",
            state
                .driver
                .create_cloned_volume(&request.volume, src_vref)
                .await,
        ),
    };

    finish_empty(&state, operation, result, StatusCode::CREATED)
}

/// Extend a volume
async fn extend_volume(
    State(state): State<AppState>,
    Json(request): Json<ExtendVolumeRequest>,
) -> Response {
    let result = state
        .driver
        .extend_volume(&request.volume, request.new_size_gb)
        .await;
    finish_empty(&state, "extend_volume", result, StatusCode::NO_CONTENT)
}

/// Delete a volume
async fn delete_volume(
    State(state): State<AppState>,
    Json(request): Json<VolumeRequest>,
) -> Response {
    info!("Deleting volume: {}", request.volume.name);
    let result = state.driver.delete_volume(&request.volume).await;
    finish_empty(&state, "delete_volume", result, StatusCode::NO_CONTENT)
}

/// Ask the backend to migrate a volume
async fn migrate_volume(
    State(state): State<AppState>,
    Json(request): Json<MigrateVolumeRequest>,
) -> Response {
    let context = context_or_admin(request.context);
    let result = state
        .driver
        .migrate_volume(&context, &request.volume, &request.host)
        .await;
    finish(&state, "migrate_volume", result)
}

/// Create a snapshot
async fn create_snapshot(
    State(state): State<AppState>,
    Json(request): Json<SnapshotRequest>,
) -> Response {
    let result = state.driver.create_snapshot(&request.snapshot).await;
    finish_empty(&state, "create_snapshot", result, StatusCode::CREATED)
}

/// Delete a snapshot
async fn delete_snapshot(
    State(state): State<AppState>,
    Json(request): Json<SnapshotRequest>,
) -> Response {
    let result = state.driver.delete_snapshot(&request.snapshot).await;
    finish_empty(&state, "delete_snapshot", result, StatusCode::NO_CONTENT)
}

/// Export a new volume
async fn create_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Response {
    let context = context_or_admin(request.context);
    let result = state.driver.create_export(&context, &request.volume).await;
    finish_empty(&state, "create_export", result, StatusCode::NO_CONTENT)
}

/// Re-export an existing volume
async fn ensure_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Response {
    let context = context_or_admin(request.context);
    let result = state.driver.ensure_export(&context, &request.volume).await;
    finish_empty(&state, "ensure_export", result, StatusCode::NO_CONTENT)
}

/// Remove a volume export
async fn remove_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Response {
    let context = context_or_admin(request.context);
    let result = state.driver.remove_export(&context, &request.volume).await;
    finish_empty(&state, "remove_export", result, StatusCode::NO_CONTENT)
}

/// Attach a volume and return its connection info
async fn initialize_connection(
    State(state): State<AppState>,
    Json(request): Json<ConnectionRequest>,
) -> Response {
    info!(
        "Initializing connection for {} to {}",
        request.volume.name, request.connector.host
    );
    let result = state
        .driver
        .initialize_connection(&request.volume, &request.connector)
        .await;
    finish(&state, "initialize_connection", result)
}

/// Detach a volume
async fn terminate_connection(
    State(state): State<AppState>,
    Json(request): Json<TerminateConnectionRequest>,
) -> Response {
    let options = TerminateOptions {
        force: request.force,
    };
    let result = state
        .driver
        .terminate_connection(&request.volume, &request.connector, &options)
        .await;
    finish_empty(&state, "terminate_connection", result, StatusCode::NO_CONTENT)
}

/// Get volume stats
async fn get_stats(State(state): State<AppState>, Query(query): Query<StatsQuery>) -> Response {
    match state.driver.get_volume_stats(query.refresh).await {
        Ok(Some(stats)) => {
            state.metrics.record("get_volume_stats", "success");
            (StatusCode::OK, Json(stats)).into_response()
        }
        Ok(None) => {
            state.metrics.record("get_volume_stats", "success");
            (
                StatusCode::NOT_FOUND,
                Json(ApiErrorResponse {
                    error: "not_found".into(),
                    message: "No volume stats collected yet".into(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            state.metrics.record("get_volume_stats", "error");
            error_response("get_volume_stats", e)
        }
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.driver.check_for_setup_error().await {
        Ok(()) => (StatusCode::OK, "ready".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

fn finish<T: Serialize>(state: &AppState, operation: &str, result: Result<T>) -> Response {
    match result {
        Ok(body) => {
            state.metrics.record(operation, "success");
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            state.metrics.record(operation, "error");
            error_response(operation, e)
        }
    }
}

fn finish_empty(
    state: &AppState,
    operation: &str,
    result: Result<()>,
    status: StatusCode,
) -> Response {
    match result {
        Ok(()) => {
            state.metrics.record(operation, "success");
            status.into_response()
        }
        Err(e) => {
            state.metrics.record(operation, "error");
            error_response(operation, e)
        }
    }
}

/// Map a driver error onto an HTTP error response
fn error_response(operation: &str, e: Error) -> Response {
    let (status, code) = if e.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found".to_string())
    } else if e.is_conflict() {
        (StatusCode::CONFLICT, "conflict".to_string())
    } else if e.is_invalid_request() {
        (StatusCode::BAD_REQUEST, "invalid_request".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{}_failed", operation))
    };

    if status.is_server_error() {
        error!("{} failed: {}", operation, e);
    } else {
        warn!("{} rejected: {}", operation, e);
    }

    (
        status,
        Json(ApiErrorResponse {
            error: code,
            message: e.to_string(),
        }),
    )
        .into_response()
}

fn context_or_admin(context: Option<RequestContext>) -> RequestContext {
    context.unwrap_or_else(|| RequestContext::admin(request_id()))
}

/// Generate a request id from the current time
fn request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    format!("req-{:016x}", now as u64)
}

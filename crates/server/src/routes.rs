//! REST handlers and error-to-status mapping.
//!
//! The surface is a thin adapter: it validates input shapes, calls the
//! catalog or coordinator, and translates outcomes to status codes. All
//! non-2xx responses carry `{"error": string}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use elytra_catalog::{DatasetSummary, RegisterDataset, RowGroupMeta};
use elytra_common::{global_metrics, ElytraError};
use elytra_control::OpDescriptor;

use crate::AppState;

/// HTTP error response carrying the taxonomy-mapped status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<ElytraError> for ApiError {
    fn from(e: ElytraError) -> Self {
        let status = match &e {
            ElytraError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ElytraError::MissingApiKey => StatusCode::UNAUTHORIZED,
            ElytraError::DatasetNotFound(_) => StatusCode::NOT_FOUND,
            ElytraError::NoWorkers => StatusCode::SERVICE_UNAVAILABLE,
            ElytraError::Worker(_)
            | ElytraError::Transport(_)
            | ElytraError::Timeout(_)
            | ElytraError::Io(_)
            | ElytraError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Internal details stay in the log; the client gets an opaque 500.
        let message = match &e {
            ElytraError::Io(_) | ElytraError::Internal(_) => {
                error!(error = %e, "internal error");
                "internal error".to_string()
            }
            _ => e.to_string(),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Request body for `POST /api/register-dataset`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDatasetRequest {
    /// Display label.
    pub name: String,
    /// Object key of the columnar artifact.
    pub storage_key: String,
    /// Bucket holding the artifact.
    pub bucket: String,
    /// Public URL for workers; derived from bucket and key when omitted.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Row groups in the file's native order.
    pub row_groups: Vec<RowGroupSpec>,
}

/// One row group in a registration request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowGroupSpec {
    /// Row-group id.
    pub id: u32,
    /// Rows in the group.
    pub row_count: u64,
}

/// Response body for a successful registration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDatasetResponse {
    /// Assigned dataset id.
    pub dataset_id: String,
    /// Number of row groups recorded.
    pub row_group_count: usize,
}

/// `POST /api/register-dataset`
pub async fn register_dataset(
    State(state): State<AppState>,
    Json(req): Json<RegisterDatasetRequest>,
) -> Result<Json<RegisterDatasetResponse>, ApiError> {
    let public_url = req.public_url.unwrap_or_else(|| {
        format!("https://{}.s3.amazonaws.com/{}", req.bucket, req.storage_key)
    });
    let meta = state.catalog.register(RegisterDataset {
        name: req.name,
        storage_key: req.storage_key,
        storage_bucket: req.bucket,
        public_url,
        row_groups: req
            .row_groups
            .into_iter()
            .map(|rg| RowGroupMeta {
                group_id: rg.id,
                row_count: rg.row_count,
            })
            .collect(),
    })?;
    Ok(Json(RegisterDatasetResponse {
        dataset_id: meta.id,
        row_group_count: meta.row_groups.len(),
    }))
}

/// `GET /api/datasets`
pub async fn list_datasets(State(state): State<AppState>) -> Json<Vec<DatasetSummary>> {
    Json(state.catalog.list())
}

/// `DELETE /api/datasets/{id}`
pub async fn delete_dataset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.catalog.delete(&id) {
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(ElytraError::DatasetNotFound(id).into())
    }
}

/// Request body for `POST /api/jobs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    /// Pre-shared opaque token; presence is required, value is not checked.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Target dataset.
    pub dataset_id: String,
    /// The pipeline to run.
    pub ops: Vec<OpDescriptor>,
}

/// Response body for a resolved job.
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    /// Merged job result.
    pub result: Value,
}

/// `POST /api/jobs`
///
/// The token check runs before any catalog or registry access.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    if req.api_key.as_deref().is_none_or(str::is_empty) {
        return Err(ElytraError::MissingApiKey.into());
    }
    let ticket = state.coordinator.submit(&req.dataset_id, req.ops)?;
    let result = ticket
        .await
        .map_err(|_| ElytraError::Internal("job resolver dropped before resolution".to_string()))??;
    Ok(Json(SubmitJobResponse { result }))
}

/// `GET /healthz`
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /metrics`
pub async fn metrics() -> String {
    global_metrics().render_prometheus()
}

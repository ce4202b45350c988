//! Worker HTTP surface (spec §4.7).
//!
//! Grounded on `abp-daemon/src/lib.rs`'s `build_app`/`ApiError` pattern and
//! on `original_source/rayvault/agent/worker_server.py`'s endpoint set and
//! status-code semantics (401 auth, 403 envelope mismatch, 404 not found).

use crate::queue::JobQueue;
use axum::{
    extract::{Path as AxPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dispatch_core::{utc_now_iso, CapabilityReport, ErrorCode, JOB_STEPS};
use dispatch_protocol::require_valid_auth;
use dispatch_receipt::ReceiptStore;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Shared state behind every handler.
pub struct AppState {
    /// Shared HMAC secret this worker verifies envelopes against.
    pub secret: String,
    /// This worker's job queue.
    pub queue: JobQueue,
    /// Receipt/log store rooted at the worker's workspace.
    pub receipts: Arc<ReceiptStore>,
    /// This worker's stable identifier.
    pub worker_id: String,
    /// Capability report returned by `/health` and `/caps`.
    pub caps: CapabilityReport,
    /// Allowed clock skew in seconds for incoming envelopes.
    pub skew_seconds: i64,
}

/// Structured API error, rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn from_dispatch_error(status: StatusCode, err: dispatch_core::DispatchError) -> Self {
        Self::new(status, err.code(), err.message().to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message, "code": self.code }));
        (self.status, body).into_response()
    }
}

/// Build the worker's axum router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/caps", post(cmd_register_caps))
        .route("/job", post(cmd_submit_job))
        .route("/job/{job_id}", get(cmd_job_status))
        .route("/job/{job_id}/logs", get(cmd_job_logs))
        .route("/job/{job_id}/artifacts", get(cmd_job_artifacts))
        .route("/job/{job_id}/artifacts/{name}", get(cmd_job_artifact_file))
        .with_state(state)
}

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "worker_id": state.worker_id,
        "time": utc_now_iso(),
        "queue_depth": state.queue.queue_depth(),
        "caps": state.caps,
    }))
}

#[derive(Debug, Deserialize)]
struct SignedEnvelopeBody {
    #[serde(default)]
    message_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(flatten)]
    envelope: serde_json::Value,
}

fn require_message_type(expected: &str, got: &str) -> Result<(), ApiError> {
    if got != expected {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::MalformedEnvelope,
            format!("message_type must be {expected:?}"),
        ));
    }
    Ok(())
}

async fn cmd_register_caps(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignedEnvelopeBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_message_type("register_caps", &body.message_type)?;
    require_valid_auth(&state.secret, &body.envelope, &["REGISTER_CAPS"], state.skew_seconds)
        .map_err(|e| ApiError::from_dispatch_error(StatusCode::UNAUTHORIZED, e))?;

    Ok(Json(json!({
        "ok": true,
        "worker_id": state.worker_id,
        "capabilities": state.caps,
    })))
}

async fn cmd_submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignedEnvelopeBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_message_type("submit_job", &body.message_type)?;
    let env = require_valid_auth(&state.secret, &body.envelope, JOB_STEPS, state.skew_seconds)
        .map_err(|e| ApiError::from_dispatch_error(StatusCode::UNAUTHORIZED, e))?;

    let outcome = state
        .queue
        .enqueue(&env.run_id, &env.job_id, &env.step_name, &env.inputs_hash, body.payload);
    Ok(Json(json!({
        "ok": true,
        "idempotent": outcome.idempotent,
        "cached_job_id": outcome.cached_job_id,
        "job": outcome.job,
    })))
}

#[derive(Debug, Deserialize)]
struct JobQueryEnvelope {
    run_id: String,
    step_name: String,
    inputs_hash: String,
    timestamp: String,
    #[serde(default)]
    auth_token: String,
}

fn verify_read_request(
    state: &AppState,
    params: &JobQueryEnvelope,
    job_id: &str,
    allowed_step: &str,
) -> Result<dispatch_protocol::Envelope, ApiError> {
    let data = json!({
        "run_id": params.run_id,
        "job_id": job_id,
        "step_name": params.step_name,
        "inputs_hash": params.inputs_hash,
        "timestamp": params.timestamp,
        "auth_token": params.auth_token,
    });
    require_valid_auth(&state.secret, &data, &[allowed_step], state.skew_seconds)
        .map_err(|e| ApiError::from_dispatch_error(StatusCode::UNAUTHORIZED, e))
}

fn load_record_checked(
    state: &AppState,
    job_id: &str,
    env: &dispatch_protocol::Envelope,
) -> Result<dispatch_core::JobRecord, ApiError> {
    let record = state
        .queue
        .get(job_id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, format!("job_id not found: {job_id}")))?;

    if record.run_id != env.run_id || record.inputs_hash != env.inputs_hash {
        return Err(ApiError::new(StatusCode::FORBIDDEN, ErrorCode::EnvelopeMismatch, "job envelope mismatch"));
    }
    Ok(record)
}

async fn cmd_job_status(
    State(state): State<Arc<AppState>>,
    AxPath(job_id): AxPath<String>,
    Query(params): Query<JobQueryEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let env = verify_read_request(&state, &params, &job_id, "JOB_STATUS")?;
    let record = load_record_checked(&state, &job_id, &env)?;
    Ok(Json(json!({ "ok": true, "job": record })))
}

async fn cmd_job_logs(
    State(state): State<Arc<AppState>>,
    AxPath(job_id): AxPath<String>,
    Query(params): Query<JobQueryEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let env = verify_read_request(&state, &params, &job_id, "JOB_LOGS")?;
    let record = load_record_checked(&state, &job_id, &env)?;
    let content = std::fs::read_to_string(state.receipts.log_path(&record.run_id, &job_id)).unwrap_or_default();
    Ok(content)
}

async fn cmd_job_artifacts(
    State(state): State<Arc<AppState>>,
    AxPath(job_id): AxPath<String>,
    Query(params): Query<JobQueryEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let env = verify_read_request(&state, &params, &job_id, "JOB_ARTIFACTS")?;
    let record = load_record_checked(&state, &job_id, &env)?;
    let receipt_path = state.receipts.receipt_path(&record.run_id, &job_id);
    Ok(Json(json!({
        "ok": true,
        "job_id": job_id,
        "status": record.status,
        "artifacts": record.artifacts,
        "receipt_path": receipt_path.to_string_lossy(),
    })))
}

async fn cmd_job_artifact_file(
    State(state): State<Arc<AppState>>,
    AxPath((job_id, name)): AxPath<(String, String)>,
    Query(params): Query<JobQueryEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    let env = verify_read_request(&state, &params, &job_id, "JOB_ARTIFACTS")?;
    let record = load_record_checked(&state, &job_id, &env)?;

    let path = state
        .receipts
        .safe_artifact_path(&record.run_id, &job_id, &name)
        .map_err(|e| ApiError::from_dispatch_error(StatusCode::BAD_REQUEST, e))?;
    let bytes = std::fs::read(&path)
        .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, format!("artifact not found: {name}")))?;
    Ok(bytes)
}

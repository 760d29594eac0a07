//! HTTP API: job submission, status, cancellation, health checks and
//! Prometheus metrics

use coach_lib::{
    health::{ComponentStatus, HealthRegistry},
    models::{UserId, VideoSubmission},
    observability::CoachMetrics,
    registry::JobSnapshot,
    service::{AnalysisService, JobTicket, ReportStatus, SubmitRejection, ValidationError},
    storage::UploadStore,
};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AnalysisService>,
    pub uploads: UploadStore,
    pub health_registry: HealthRegistry,
    pub metrics: CoachMetrics,
}

impl AppState {
    pub fn new(service: Arc<AnalysisService>, uploads: UploadStore, health_registry: HealthRegistry) -> Self {
        Self {
            service,
            uploads,
            health_registry,
            metrics: CoachMetrics::new(),
        }
    }
}

/// Body of `POST /v1/users/:user/videos`
#[derive(Debug, Deserialize)]
pub struct SubmitVideoRequest {
    /// Stored video, absolute or relative to the upload directory
    pub video_path: PathBuf,
    pub duration_secs: u64,
    pub mime_type: String,
    #[serde(default)]
    pub caption: Option<String>,
    /// Hold the response until the job finishes
    #[serde(default = "default_wait")]
    pub wait: bool,
}

/// Query of `POST /v1/users/:user/uploads`
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub duration_secs: u64,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

/// Returned with 202 when the caller does not wait
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub job_id: Uuid,
    pub user: UserId,
    pub remaining: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub user: UserId,
    pub job: Option<JobSnapshot>,
    pub remaining: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub message: String,
}

/// Error body for rejected submissions
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

fn rejection_response(rejection: &SubmitRejection) -> Response {
    let mut body = RejectionBody {
        error: rejection.reason(),
        message: rejection.to_string(),
        remaining: None,
        retry_after_secs: None,
        job_id: None,
    };
    let mut retry_after = None;
    let status = match rejection {
        SubmitRejection::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SubmitRejection::RateLimited {
            remaining,
            retry_after_secs,
            ..
        } => {
            body.remaining = Some(*remaining);
            body.retry_after_secs = Some(*retry_after_secs);
            retry_after = Some(HeaderValue::from(*retry_after_secs));
            StatusCode::TOO_MANY_REQUESTS
        }
        SubmitRejection::AlreadyActive { job_id } => {
            body.job_id = Some(*job_id);
            StatusCode::CONFLICT
        }
    };

    let mut response = (status, Json(body)).into_response();
    if let Some(value) = retry_after {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// Reply for an admitted job: the final report or a 202 ticket
async fn ticket_response(ticket: JobTicket, wait: bool) -> Response {
    if !wait {
        let body = TicketResponse {
            job_id: ticket.job_id,
            user: ticket.user,
            remaining: ticket.remaining,
            message: "video accepted, analysis started".to_string(),
        };
        return (StatusCode::ACCEPTED, Json(body)).into_response();
    }

    let report = ticket.wait().await;
    let status = match report.status {
        ReportStatus::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    (status, Json(report)).into_response()
}

async fn submit_video(
    State(state): State<Arc<AppState>>,
    Path(user): Path<i64>,
    Json(req): Json<SubmitVideoRequest>,
) -> Response {
    let Some(stored) = state.uploads.locate(&req.video_path).await else {
        return rejection_response(&SubmitRejection::Validation(ValidationError::UnknownVideo));
    };
    let submission = VideoSubmission {
        user: UserId(user),
        video_path: stored.path,
        duration_secs: req.duration_secs,
        size_bytes: stored.size_bytes,
        mime_type: req.mime_type,
        caption: req.caption,
    };
    match state.service.submit(submission) {
        Ok(ticket) => ticket_response(ticket, req.wait).await,
        Err(rejection) => rejection_response(&rejection),
    }
}

async fn upload_video(
    State(state): State<Arc<AppState>>,
    Path(user): Path<i64>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = UserId(user);
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("video/mp4")
        .to_string();

    let mut submission = VideoSubmission {
        user,
        video_path: PathBuf::new(),
        duration_secs: params.duration_secs,
        size_bytes: body.len() as u64,
        mime_type,
        caption: params.caption,
    };
    // Reject bad input before touching the disk
    if let Err(invalid) = state.service.validate(&submission) {
        return rejection_response(&SubmitRejection::Validation(invalid));
    }

    let path = match state.uploads.save(user, &submission.mime_type, &body).await {
        Ok(path) => path,
        Err(e) => {
            error!(user_id = %user, error = %e, "Failed to store upload");
            return unexpected_response();
        }
    };
    submission.video_path = path.clone();

    match state.service.submit(submission) {
        Ok(ticket) => ticket_response(ticket, params.wait).await,
        Err(rejection) => {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove rejected upload");
            }
            rejection_response(&rejection)
        }
    }
}

async fn job_status(State(state): State<Arc<AppState>>, Path(user): Path<i64>) -> Json<StatusResponse> {
    let user = UserId(user);
    Json(StatusResponse {
        user,
        job: state.service.active_job(user),
        remaining: state.service.remaining(user),
    })
}

async fn cancel_job(State(state): State<Arc<AppState>>, Path(user): Path<i64>) -> impl IntoResponse {
    let user = UserId(user);
    if state.service.cancel(user).await {
        info!(user_id = %user, "Cancellation accepted");
        (
            StatusCode::OK,
            Json(CancelResponse {
                cancelled: true,
                message: "cancellation accepted".to_string(),
            }),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(CancelResponse {
                cancelled: false,
                message: "nothing to cancel".to_string(),
            }),
        )
    }
}

fn unexpected_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": "unexpected",
            "message": "something went wrong, please try again later"
        })),
    )
        .into_response()
}

/// Health check response - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let pool = state.service.orchestrator().pool();
    state.metrics.set_pool_load(pool.in_flight(), pool.queued());

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Leave headroom so slightly oversized uploads get a validation error
    let body_limit = (state.service.limits().max_size_bytes as usize).saturating_mul(2);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/users/:user/videos", post(submit_video))
        .route("/v1/users/:user/uploads", post(upload_video))
        .route("/v1/users/:user/job", get(job_status).delete(cancel_job))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

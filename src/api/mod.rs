//! Thin HTTP layer over the engine: session CRUD, run, and polling.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::LivecodeError;
use crate::scheduler::{ChannelTransport, Dispatcher, Job, JobStatus, Session, SessionPatch};
use crate::store::{JobStore, SessionStore};

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<dyn SessionStore>,
    pub jobs: Arc<dyn JobStore>,
    pub dispatcher: Dispatcher,
    pub transport: ChannelTransport,
    pub workers: usize,
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    language: Option<String>,
    source_code: Option<String>,
}

#[derive(Serialize)]
struct SessionBriefResponse {
    session_id: String,
    status: String,
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    status: String,
    language: String,
    source_code: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        Self {
            session_id: s.id.to_string(),
            status: s.status,
            language: s.language,
            source_code: s.source_code,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Poll view of one execution. Output appears only once the job is terminal.
#[derive(Debug, Serialize)]
pub struct ExecutionView {
    pub execution_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl From<Job> for ExecutionView {
    fn from(job: Job) -> Self {
        let terminal = job.status.is_terminal();
        Self {
            execution_id: job.id.to_string(),
            status: job.status,
            stdout: terminal.then(|| job.stdout.unwrap_or_default()),
            stderr: terminal.then(|| job.stderr.unwrap_or_default()),
            execution_time_ms: if terminal { job.execution_time_ms } else { None },
        }
    }
}

#[derive(Serialize)]
struct ExecutionListItem {
    execution_id: String,
    status: JobStatus,
    queued_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    execution_time_ms: Option<u64>,
}

#[derive(Serialize)]
struct ExecutionListResponse {
    session_id: String,
    executions: Vec<ExecutionListItem>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    workers: usize,
    /// Run messages not yet picked up by a worker
    queued: usize,
}

/// Engine errors rendered as `{"error": ...}` with a matching status code.
pub struct ApiError(LivecodeError);

impl From<LivecodeError> for ApiError {
    fn from(e: LivecodeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            LivecodeError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "Session not found".to_string()),
            LivecodeError::JobNotFound(_) => (StatusCode::NOT_FOUND, "Execution not found".to_string()),
            LivecodeError::TransportFull { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Job queue is at capacity".to_string(),
            ),
            LivecodeError::StoreFull { .. } => (
                StatusCode::INSUFFICIENT_STORAGE,
                "Job store is at capacity".to_string(),
            ),
            e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            e => {
                tracing::error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/code-sessions", post(create_session_handler))
        .route(
            "/code-sessions/:session_id",
            get(get_session_handler)
                .patch(update_session_handler)
                .delete(delete_session_handler),
        )
        .route("/code-sessions/:session_id/run", post(run_handler))
        .route("/executions/:execution_id", get(get_execution_handler))
        .route("/executions/session/:session_id", get(list_executions_handler))
        .route("/executions/session/:session_id/execute", post(run_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting HTTP API");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind HTTP API");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "HTTP API failed");
    }
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        workers: state.workers,
        queued: state.transport.pending(),
    })
}

async fn create_session_handler(
    State(state): State<ApiState>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session = state
        .sessions
        .create_session(req.language, req.source_code)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionBriefResponse {
            session_id: session.id.to_string(),
            status: session.status,
        }),
    ))
}

async fn get_session_handler(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.sessions.get_session(session_id).await?;
    Ok(Json(session.into()))
}

async fn update_session_handler(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
    Json(patch): Json<SessionPatch>,
) -> ApiResult<Json<SessionBriefResponse>> {
    let session = state.sessions.update_session(session_id, patch).await?;
    Ok(Json(SessionBriefResponse {
        session_id: session.id.to_string(),
        status: session.status,
    }))
}

async fn delete_session_handler(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.sessions.delete_session(session_id).await?;
    Ok(Json(
        serde_json::json!({ "message": "Session deleted successfully" }),
    ))
}

async fn run_handler(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let receipt = state.dispatcher.dispatch(session_id).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn get_execution_handler(
    State(state): State<ApiState>,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<ExecutionView>> {
    let job = state.jobs.get_job(execution_id).await?;
    Ok(Json(job.into()))
}

async fn list_executions_handler(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ExecutionListResponse>> {
    let executions = state
        .jobs
        .list_jobs(session_id)
        .await?
        .into_iter()
        .map(|job| ExecutionListItem {
            execution_id: job.id.to_string(),
            status: job.status,
            queued_at: job.queued_at,
            finished_at: job.finished_at,
            execution_time_ms: job.execution_time_ms,
        })
        .collect();

    Ok(Json(ExecutionListResponse {
        session_id: session_id.to_string(),
        executions,
    }))
}

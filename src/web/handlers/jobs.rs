use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::JobError;
use crate::schedule::scheduler::JobManager;
use crate::schedule::types::{Job, JobParams, JobStats, JobStatus};
use crate::web::Pagination;

pub fn jobs_router(job_manager: Arc<JobManager>) -> Router {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/stats", get(get_stats))
        .route("/clear", post(clear_jobs))
        .route("/:job_id", get(get_job).delete(delete_job))
        .route("/:job_id/cancel", post(cancel_job))
        .route("/:job_id/restart", post(restart_job))
        .route("/:job_id/chain", post(chain_job))
        .route("/:job_id/logs", get(get_logs))
        .with_state(job_manager)
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn status_for(e: &JobError) -> StatusCode {
    match e {
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::Validation(_) | JobError::NoProcessor(_) => StatusCode::BAD_REQUEST,
        JobError::Concurrency { .. } | JobError::InvalidState { .. } => StatusCode::CONFLICT,
        JobError::Store(_) | JobError::Encode(_) | JobError::Corrupt { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn reply<T: Serialize>(result: Result<T, JobError>, ok: StatusCode, action: &str) -> Reply<T> {
    match result {
        Ok(data) => (ok, Json(ApiResponse::success(data))),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Failed to {}: {}", action, e);
            }
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

// Submit job endpoint
async fn submit_job(
    State(job_manager): State<Arc<JobManager>>,
    Json(params): Json<JobParams>,
) -> Reply<Job> {
    reply(job_manager.submit(params).await, StatusCode::CREATED, "submit job")
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    /// Comma separated statuses, e.g. `queued,running`.
    status: Option<String>,
    index: Option<u64>,
    size: Option<u64>,
}

fn parse_statuses(raw: &str) -> Result<Vec<JobStatus>, JobError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| JobStatus::try_from(s).map_err(JobError::Validation))
        .collect()
}

async fn list_filtered(job_manager: &JobManager, query: ListQuery) -> Result<Vec<Job>, JobError> {
    let statuses = query.status.as_deref().map(parse_statuses).transpose()?;
    let jobs = job_manager.list(statuses.as_deref()).await?;
    Ok(match query.index {
        Some(index) => Pagination {
            index,
            size: query.size.unwrap_or(Pagination::default().size),
        }
        .apply(jobs),
        None => jobs,
    })
}

// List jobs endpoint
async fn list_jobs(
    State(job_manager): State<Arc<JobManager>>,
    Query(query): Query<ListQuery>,
) -> Reply<Vec<Job>> {
    reply(list_filtered(&job_manager, query).await, StatusCode::OK, "list jobs")
}

// Get job stats endpoint
async fn get_stats(State(job_manager): State<Arc<JobManager>>) -> Reply<JobStats> {
    reply(job_manager.stats().await, StatusCode::OK, "count jobs")
}

#[derive(Debug, Default, Deserialize)]
struct ClearRequest {
    statuses: Option<Vec<JobStatus>>,
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    deleted: u64,
}

// Clear finished jobs endpoint
async fn clear_jobs(
    State(job_manager): State<Arc<JobManager>>,
    body: Option<Json<ClearRequest>>,
) -> Reply<ClearResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let result = job_manager
        .clear(req.statuses.as_deref())
        .await
        .map(|deleted| ClearResponse { deleted });
    reply(result, StatusCode::OK, "clear jobs")
}

// Get job endpoint
async fn get_job(
    State(job_manager): State<Arc<JobManager>>,
    Path(job_id): Path<String>,
) -> Reply<Job> {
    reply(job_manager.get(&job_id).await, StatusCode::OK, "get job")
}

async fn delete_job(
    State(job_manager): State<Arc<JobManager>>,
    Path(job_id): Path<String>,
) -> Reply<()> {
    reply(job_manager.delete(&job_id).await, StatusCode::OK, "delete job")
}

async fn cancel_job(
    State(job_manager): State<Arc<JobManager>>,
    Path(job_id): Path<String>,
) -> Reply<Job> {
    reply(job_manager.cancel(&job_id).await, StatusCode::OK, "cancel job")
}

async fn restart_job(
    State(job_manager): State<Arc<JobManager>>,
    Path(job_id): Path<String>,
) -> Reply<Job> {
    reply(job_manager.restart(&job_id).await, StatusCode::CREATED, "restart job")
}

// Re-create missing children of an acquire job
async fn chain_job(
    State(job_manager): State<Arc<JobManager>>,
    Path(job_id): Path<String>,
) -> Reply<Vec<Job>> {
    reply(job_manager.chain_children(&job_id).await, StatusCode::OK, "chain job")
}

async fn get_logs(
    State(job_manager): State<Arc<JobManager>>,
    Path(job_id): Path<String>,
) -> Reply<String> {
    reply(job_manager.logs(&job_id).await, StatusCode::OK, "read job log")
}

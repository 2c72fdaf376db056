use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;
use xharvest_core::{DateRange, JobRun, JobStatus, NewJob, QueryMode, StoreError};
use xharvest_harvester::StartError;

use crate::middleware::RequestId;

use super::{job_not_found, map_db_error, normalize_limit, ApiError, ApiResponse, AppState};

type JobResponse = Json<ApiResponse<JobItem>>;

#[derive(Debug, Deserialize)]
pub(super) struct JobsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateJobRequest {
    #[serde(default)]
    pub name: String,
    pub account_id: i64,
    pub targets: Vec<String>,
    pub query_mode: QueryMode,
    pub since: NaiveDate,
    pub until: NaiveDate,
}

#[derive(Debug, Serialize)]
pub(super) struct JobItem {
    id: i64,
    public_id: Uuid,
    name: String,
    account_id: i64,
    targets: Vec<String>,
    query_mode: QueryMode,
    since: NaiveDate,
    until: NaiveDate,
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_secs: Option<i64>,
    error_detail: Option<String>,
    result_count: i64,
    cancel_requested: bool,
    created_at: DateTime<Utc>,
}

impl From<JobRun> for JobItem {
    fn from(job: JobRun) -> Self {
        Self {
            duration_secs: job.duration().map(|d| d.num_seconds()),
            id: job.id,
            public_id: job.public_id,
            name: job.name,
            account_id: job.account_id,
            targets: job.targets,
            query_mode: job.query_mode,
            since: job.range.since,
            until: job.range.until,
            status: job.status,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_detail: job.error_detail,
            result_count: job.result_count,
            cancel_requested: job.cancel_requested,
            created_at: job.created_at,
        }
    }
}

pub(super) async fn list_jobs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<ApiResponse<Vec<JobItem>>>, ApiError> {
    let jobs = xharvest_db::list_jobs(&state.pool, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        jobs.into_iter().map(JobItem::from).collect(),
    ))
}

pub(super) async fn create_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, JobResponse), ApiError> {
    let new_job = NewJob {
        name: body.name,
        account_id: body.account_id,
        targets: body.targets,
        query_mode: body.query_mode,
        range: DateRange {
            since: body.since,
            until: body.until,
        },
    }
    .validate()
    .map_err(|e| ApiError::new(req_id.0.clone(), "validation_error", e.to_string()))?;

    let account = xharvest_db::get_account(&state.pool, new_job.account_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    match account {
        Some(account) if account.is_active => {}
        Some(_) => {
            return Err(ApiError::new(
                req_id.0,
                "validation_error",
                format!("account {} is inactive", new_job.account_id),
            ))
        }
        None => {
            return Err(ApiError::new(
                req_id.0,
                "validation_error",
                format!("account {} does not exist", new_job.account_id),
            ))
        }
    }

    let job = xharvest_db::create_job(&state.pool, &new_job)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(job_id = job.id, targets = ?job.targets, "job created");

    Ok((StatusCode::CREATED, ApiResponse::new(req_id.0, job.into())))
}

pub(super) async fn get_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<JobResponse, ApiError> {
    let job = xharvest_db::get_job(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| job_not_found(req_id.0.clone(), id))?;

    Ok(ApiResponse::new(req_id.0, job.into()))
}

/// Moves the job to `running` and hands it to a background task.
///
/// Returns as soon as the job has started; progress is visible through
/// `GET /jobs/{id}`.
pub(super) async fn start_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, JobResponse), ApiError> {
    let job = match state.runner.begin(id).await {
        Ok(job) => job,
        Err(e @ StartError::Conflict { .. }) => {
            return Err(ApiError::new(req_id.0, "conflict", e.to_string()))
        }
        Err(StartError::Store(StoreError::NotFound { .. })) => {
            return Err(job_not_found(req_id.0, id))
        }
        Err(e) => {
            tracing::error!(job_id = id, error = %e, "failed to start job");
            return Err(ApiError::new(req_id.0, "internal_error", "failed to start job"));
        }
    };

    let runner = Arc::clone(&state.runner);
    let worker_job = job.clone();
    tokio::spawn(
        async move {
            runner.execute(worker_job).await;
        }
        .instrument(tracing::info_span!("worker", job_id = id)),
    );

    Ok((StatusCode::ACCEPTED, ApiResponse::new(req_id.0, job.into())))
}

/// Asks a running job to stop at its next window boundary.
pub(super) async fn cancel_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, JobResponse), ApiError> {
    xharvest_db::request_cancel(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(job_id = id, "cancellation requested");

    let job = xharvest_db::get_job(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| job_not_found(req_id.0.clone(), id))?;

    Ok((StatusCode::ACCEPTED, ApiResponse::new(req_id.0, job.into())))
}

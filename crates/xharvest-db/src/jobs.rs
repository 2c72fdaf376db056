//! Database operations for `harvest_jobs` and `harvest_job_targets`.
//!
//! Status changes are conditional updates guarded by the current status, so
//! two workers racing to start the same job cannot both succeed.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use xharvest_core::{DateRange, JobRun, JobStatus, JobTransition, NewJob, QueryMode};

use crate::targets::get_or_create_target;
use crate::DbError;

/// Failure detail recorded on jobs abandoned by a previous process.
pub const ORPHANED_JOB_DETAIL: &str = "interrupted: worker restarted before completion";

const JOB_COLUMNS: &str = "id, public_id, name, account_id, query_mode, since_date, until_date, \
     status, started_at, completed_at, error_detail, result_count, cancel_requested, created_at";

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `harvest_jobs` table. Targets live in `harvest_job_targets`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HarvestJobRow {
    pub id: i64,
    pub public_id: Uuid,
    pub name: String,
    pub account_id: i64,
    pub query_mode: String,
    pub since_date: NaiveDate,
    pub until_date: NaiveDate,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    pub result_count: i64,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
}

impl HarvestJobRow {
    /// Combines the row with its ordered target handles.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidStoredValue`] if `status` or `query_mode`
    /// holds a value the domain types do not know.
    pub fn into_job_run(self, targets: Vec<String>) -> Result<JobRun, DbError> {
        let status = self.parsed_status()?;
        let query_mode = self
            .query_mode
            .parse::<QueryMode>()
            .map_err(|_| DbError::InvalidStoredValue {
                column: "query_mode",
                value: self.query_mode.clone(),
            })?;

        Ok(JobRun {
            id: self.id,
            public_id: self.public_id,
            name: self.name,
            account_id: self.account_id,
            targets,
            query_mode,
            range: DateRange {
                since: self.since_date,
                until: self.until_date,
            },
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_detail: self.error_detail,
            result_count: self.result_count,
            cancel_requested: self.cancel_requested,
            created_at: self.created_at,
        })
    }

    /// # Errors
    ///
    /// Returns [`DbError::InvalidStoredValue`] for an unknown status string.
    pub fn parsed_status(&self) -> Result<JobStatus, DbError> {
        self.status
            .parse::<JobStatus>()
            .map_err(|_| DbError::InvalidStoredValue {
                column: "status",
                value: self.status.clone(),
            })
    }
}

// ---------------------------------------------------------------------------
// Creation and reads
// ---------------------------------------------------------------------------

/// Inserts a `pending` job and links its targets, creating unknown targets.
///
/// The caller is expected to have run [`NewJob::validate`].
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; nothing is written in
/// that case.
pub async fn create_job(pool: &PgPool, job: &NewJob) -> Result<JobRun, DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, HarvestJobRow>(&format!(
        "INSERT INTO harvest_jobs (name, account_id, query_mode, since_date, until_date, status) \
         VALUES ($1, $2, $3, $4, $5, 'pending') \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(&job.name)
    .bind(job.account_id)
    .bind(job.query_mode.as_str())
    .bind(job.range.since)
    .bind(job.range.until)
    .fetch_one(&mut *tx)
    .await?;

    for (position, username) in job.targets.iter().enumerate() {
        let target_id = get_or_create_target(&mut tx, username).await?;
        sqlx::query(
            "INSERT INTO harvest_job_targets (job_id, target_id, position) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (job_id, target_id) DO NOTHING",
        )
        .bind(row.id)
        .bind(target_id)
        .bind(i32::try_from(position).unwrap_or(i32::MAX))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::debug!(job_id = row.id, targets = job.targets.len(), "job created");
    row.into_job_run(job.targets.clone())
}

/// Returns a job by id, or `None` if not found.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_job(pool: &PgPool, id: i64) -> Result<Option<JobRun>, DbError> {
    let row = sqlx::query_as::<_, HarvestJobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM harvest_jobs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let targets = job_targets(pool, row.id).await?;
            row.into_job_run(targets).map(Some)
        }
        None => Ok(None),
    }
}

/// Lists jobs newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_jobs(pool: &PgPool, limit: i64) -> Result<Vec<JobRun>, DbError> {
    let rows = sqlx::query_as::<_, HarvestJobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM harvest_jobs \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let links = sqlx::query_as::<_, (i64, String)>(
        "SELECT jt.job_id, t.username \
         FROM harvest_job_targets jt \
         JOIN search_targets t ON t.id = jt.target_id \
         WHERE jt.job_id = ANY($1) \
         ORDER BY jt.job_id, jt.position",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut by_job: HashMap<i64, Vec<String>> = HashMap::new();
    for (job_id, username) in links {
        by_job.entry(job_id).or_default().push(username);
    }

    rows.into_iter()
        .map(|row| {
            let targets = by_job.remove(&row.id).unwrap_or_default();
            row.into_job_run(targets)
        })
        .collect()
}

async fn job_targets(pool: &PgPool, job_id: i64) -> Result<Vec<String>, DbError> {
    let targets = sqlx::query_scalar::<_, String>(
        "SELECT t.username \
         FROM harvest_job_targets jt \
         JOIN search_targets t ON t.id = jt.target_id \
         WHERE jt.job_id = $1 \
         ORDER BY jt.position",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(targets)
}

// ---------------------------------------------------------------------------
// Status transitions
// ---------------------------------------------------------------------------

/// Applies `transition` if the job is currently in the transition's
/// required status.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobTransition`] when the job is in another
/// state, [`DbError::NotFound`] when it does not exist, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn apply_transition(
    pool: &PgPool,
    id: i64,
    transition: &JobTransition,
) -> Result<JobRun, DbError> {
    let expected = transition.required_status();

    let updated = match transition {
        JobTransition::Start { at } => {
            sqlx::query_as::<_, HarvestJobRow>(&format!(
                "UPDATE harvest_jobs \
                 SET status = 'running', started_at = $2 \
                 WHERE id = $1 AND status = 'pending' \
                 RETURNING {JOB_COLUMNS}"
            ))
            .bind(id)
            .bind(at)
            .fetch_optional(pool)
            .await?
        }
        JobTransition::Complete { at, result_count } => {
            sqlx::query_as::<_, HarvestJobRow>(&format!(
                "UPDATE harvest_jobs \
                 SET status = 'completed', completed_at = $2, result_count = $3, \
                     error_detail = NULL \
                 WHERE id = $1 AND status = 'running' \
                 RETURNING {JOB_COLUMNS}"
            ))
            .bind(id)
            .bind(at)
            .bind(result_count)
            .fetch_optional(pool)
            .await?
        }
        JobTransition::Fail {
            at,
            detail,
            result_count,
        } => {
            sqlx::query_as::<_, HarvestJobRow>(&format!(
                "UPDATE harvest_jobs \
                 SET status = 'failed', completed_at = $2, error_detail = $3, \
                     result_count = $4 \
                 WHERE id = $1 AND status = 'running' \
                 RETURNING {JOB_COLUMNS}"
            ))
            .bind(id)
            .bind(at)
            .bind(detail)
            .bind(result_count)
            .fetch_optional(pool)
            .await?
        }
    };

    match updated {
        Some(row) => {
            let targets = job_targets(pool, row.id).await?;
            row.into_job_run(targets)
        }
        None => Err(transition_conflict(pool, id, expected).await),
    }
}

/// Flags a `running` job for cancellation.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobTransition`] unless the job is running,
/// [`DbError::NotFound`] if it does not exist, or [`DbError::Sqlx`].
pub async fn request_cancel(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE harvest_jobs SET cancel_requested = true \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(transition_conflict(pool, id, JobStatus::Running).await);
    }
    Ok(())
}

/// True when a worker should stop before its next window: cancellation was
/// requested, or the job is no longer `running` (for example it was failed
/// by orphan recovery while another process was still harvesting it).
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the job does not exist, or [`DbError::Sqlx`].
pub async fn job_should_stop(pool: &PgPool, id: i64) -> Result<bool, DbError> {
    sqlx::query_scalar::<_, bool>(
        "SELECT cancel_requested OR status <> 'running' FROM harvest_jobs WHERE id = $1",
    )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound { entity: "job", id })
}

/// Marks every `running` job as `failed`.
///
/// Called at server startup. A job still being harvested by a separate CLI
/// worker is failed too; that worker sees the job is no longer running and
/// stops at its next window, and its post inserts are refused. Each job's
/// result count is set to the posts it had already saved.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn fail_orphaned_jobs(pool: &PgPool) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE harvest_jobs \
         SET status = 'failed', completed_at = NOW(), error_detail = $1, \
             result_count = (SELECT COUNT(*) FROM harvested_posts p WHERE p.job_id = harvest_jobs.id) \
         WHERE status = 'running'",
    )
    .bind(ORPHANED_JOB_DETAIL)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Builds the error for a conditional update that matched no row.
pub(crate) async fn transition_conflict(pool: &PgPool, id: i64, expected: JobStatus) -> DbError {
    let current = sqlx::query_scalar::<_, String>("SELECT status FROM harvest_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await;

    match current {
        Ok(Some(status)) => match status.parse::<JobStatus>() {
            Ok(actual) => DbError::InvalidJobTransition {
                id,
                expected,
                actual,
            },
            Err(_) => DbError::InvalidStoredValue {
                column: "status",
                value: status,
            },
        },
        Ok(None) => DbError::NotFound { entity: "job", id },
        Err(e) => DbError::Sqlx(e),
    }
}

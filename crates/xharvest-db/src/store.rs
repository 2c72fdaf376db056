//! Postgres implementation of the harvest engine's [`JobStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use xharvest_core::{
    AccountCredentials, ExtractedPost, JobRun, JobStore, JobTransition, NewJob, SessionSnapshot,
    StoreError,
};

use crate::{accounts, jobs, posts, DbError};

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => StoreError::NotFound { entity, id },
            DbError::InvalidJobTransition {
                id,
                expected,
                actual,
            } => StoreError::Conflict {
                id,
                expected,
                actual,
            },
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, job: &NewJob) -> Result<JobRun, StoreError> {
        Ok(jobs::create_job(&self.pool, job).await?)
    }

    async fn load_job(&self, id: i64) -> Result<JobRun, StoreError> {
        jobs::get_job(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound { entity: "job", id })
    }

    async fn update_job_status(
        &self,
        id: i64,
        transition: JobTransition,
    ) -> Result<JobRun, StoreError> {
        Ok(jobs::apply_transition(&self.pool, id, &transition).await?)
    }

    async fn append_posts(&self, job_id: i64, posts: &[ExtractedPost]) -> Result<u64, StoreError> {
        Ok(posts::insert_posts(&self.pool, job_id, posts).await?)
    }

    async fn count_posts(&self, job_id: i64) -> Result<i64, StoreError> {
        Ok(posts::count_posts(&self.pool, job_id).await?)
    }

    async fn load_account(&self, account_id: i64) -> Result<AccountCredentials, StoreError> {
        accounts::get_account(&self.pool, account_id)
            .await?
            .map(|row| row.credentials())
            .ok_or(StoreError::NotFound {
                entity: "account",
                id: account_id,
            })
    }

    async fn load_saved_session(
        &self,
        account_id: i64,
    ) -> Result<Option<SessionSnapshot>, StoreError> {
        Ok(accounts::load_session_state(&self.pool, account_id).await?)
    }

    async fn save_session(
        &self,
        account_id: i64,
        snapshot: &SessionSnapshot,
        login_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(accounts::save_session_state(&self.pool, account_id, snapshot, login_at).await?)
    }

    async fn clear_session(&self, account_id: i64) -> Result<(), StoreError> {
        Ok(accounts::clear_session_state(&self.pool, account_id).await?)
    }

    async fn request_cancel(&self, id: i64) -> Result<(), StoreError> {
        Ok(jobs::request_cancel(&self.pool, id).await?)
    }

    async fn should_stop(&self, id: i64) -> Result<bool, StoreError> {
        Ok(jobs::job_should_stop(&self.pool, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use xharvest_core::JobStatus;

    use super::*;

    #[test]
    fn transition_conflict_maps_to_store_conflict() {
        let err: StoreError = DbError::InvalidJobTransition {
            id: 3,
            expected: JobStatus::Pending,
            actual: JobStatus::Running,
        }
        .into();
        assert!(matches!(
            err,
            StoreError::Conflict {
                id: 3,
                expected: JobStatus::Pending,
                actual: JobStatus::Running
            }
        ));
    }

    #[test]
    fn not_found_keeps_entity_and_id() {
        let err: StoreError = DbError::NotFound {
            entity: "account",
            id: 9,
        }
        .into();
        assert_eq!(err.to_string(), "account 9 not found");
    }

    #[test]
    fn other_errors_become_backend_errors() {
        let err: StoreError = DbError::InvalidStoredValue {
            column: "status",
            value: "paused".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::Backend(ref m) if m.contains("paused")));
    }
}

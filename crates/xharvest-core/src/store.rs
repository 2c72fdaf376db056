//! Persistence boundary consumed by the harvest engine.
//!
//! The engine never talks to a database directly; it drives a [`JobStore`].
//! `xharvest-db` provides the Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::{JobRun, JobStatus, JobTransition, NewJob};
use crate::post::ExtractedPost;
use crate::session::SessionSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A conditional status update found the job in an unexpected state.
    #[error("job {id} is {actual}, expected {expected}")]
    Conflict {
        id: i64,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Login material for the account a job harvests with.
#[derive(Clone)]
pub struct AccountCredentials {
    pub id: i64,
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job in `pending` state.
    async fn create_job(&self, job: &NewJob) -> Result<JobRun, StoreError>;

    async fn load_job(&self, id: i64) -> Result<JobRun, StoreError>;

    /// Applies `transition` only if the job is in the transition's required
    /// status; otherwise returns [`StoreError::Conflict`] and changes nothing.
    async fn update_job_status(
        &self,
        id: i64,
        transition: JobTransition,
    ) -> Result<JobRun, StoreError>;

    /// Inserts posts for a job, ignoring any `(job_id, external_id)` already
    /// present. Returns how many rows were newly inserted.
    async fn append_posts(&self, job_id: i64, posts: &[ExtractedPost]) -> Result<u64, StoreError>;

    /// Number of posts durably saved for a job.
    async fn count_posts(&self, job_id: i64) -> Result<i64, StoreError>;

    async fn load_account(&self, account_id: i64) -> Result<AccountCredentials, StoreError>;

    async fn load_saved_session(
        &self,
        account_id: i64,
    ) -> Result<Option<SessionSnapshot>, StoreError>;

    async fn save_session(
        &self,
        account_id: i64,
        snapshot: &SessionSnapshot,
        login_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Drops saved session state so the next run logs in interactively.
    async fn clear_session(&self, account_id: i64) -> Result<(), StoreError>;

    /// Flags a `running` job for cancellation at its next window boundary.
    async fn request_cancel(&self, id: i64) -> Result<(), StoreError>;

    /// True when cancellation was requested or the job has left `running`
    /// behind this worker's back. Checked before each window.
    async fn should_stop(&self, id: i64) -> Result<bool, StoreError>;
}

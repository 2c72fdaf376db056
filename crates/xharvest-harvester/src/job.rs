//! Job orchestration: `pending → running → {completed, failed}`.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::Instrument;
use xharvest_core::{AppConfig, JobRun, JobStatus, JobStore, JobTransition, StoreError};

use crate::browser::BrowserLauncher;
use crate::error::HarvestError;
use crate::harvest::{HarvestAccumulator, HarvestSettings, ScrollHarvester};
use crate::session::{Session, SessionManager, SessionSettings};
use crate::window::plan_windows;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("job {id} is {status}; only pending jobs can be started")]
    Conflict { id: i64, status: JobStatus },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for StartError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { id, actual, .. } => StartError::Conflict { id, status: actual },
            other => StartError::Store(other),
        }
    }
}

/// Drives jobs from `running` to a terminal state.
///
/// Cheap to share behind an `Arc`; each [`execute`](Self::execute) call owns
/// its own session and result set.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    sessions: SessionManager,
    harvester: ScrollHarvester,
    max_window_days: u32,
}

impl JobRunner {
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        sessions: SessionManager,
        harvester: ScrollHarvester,
        max_window_days: u32,
    ) -> Self {
        Self {
            store,
            sessions,
            harvester,
            max_window_days,
        }
    }

    #[must_use]
    pub fn from_app_config(
        store: Arc<dyn JobStore>,
        launcher: Arc<dyn BrowserLauncher>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            store,
            SessionManager::new(launcher, SessionSettings::from_app_config(config)),
            ScrollHarvester::new(HarvestSettings::from_app_config(config)),
            config.max_window_days,
        )
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Moves a `pending` job to `running`.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::Conflict`] when the job is in any other state;
    /// the job is left untouched.
    pub async fn begin(&self, job_id: i64) -> Result<JobRun, StartError> {
        let job = self
            .store
            .update_job_status(job_id, JobTransition::Start { at: Utc::now() })
            .await?;
        tracing::info!(job_id, targets = ?job.targets, mode = %job.query_mode, "job started");
        Ok(job)
    }

    /// `begin` followed by `execute`, in the caller's task.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] if the job could not be started. Harvest
    /// failures are recorded on the job, not returned.
    pub async fn run(&self, job_id: i64) -> Result<JobRun, StartError> {
        let job = self.begin(job_id).await?;
        Ok(self.execute(job).await)
    }

    /// Harvests a `running` job to completion and records the terminal state.
    ///
    /// Never fails: every error becomes a `failed` job with a readable
    /// detail. Posts saved before a failure are kept.
    pub async fn execute(&self, job: JobRun) -> JobRun {
        let span = tracing::info_span!("job", job_id = job.id, account_id = job.account_id);
        self.execute_inner(job).instrument(span).await
    }

    async fn execute_inner(&self, job: JobRun) -> JobRun {
        let mut collected = HarvestAccumulator::default();
        let result = self.harvest_all(&job, &mut collected).await;
        let at = Utc::now();

        let transition = match result {
            Ok(()) => JobTransition::Complete {
                at,
                result_count: i64::try_from(collected.len()).unwrap_or(i64::MAX),
            },
            Err(e) => {
                tracing::error!(error = %e, posts = collected.len(), "job failed");
                if e.is_session_loss() {
                    if let Err(clear_err) = self.store.clear_session(job.account_id).await {
                        tracing::warn!(error = %clear_err, "failed to clear expired session");
                    }
                }
                let saved = match self.store.count_posts(job.id).await {
                    Ok(n) => n,
                    Err(count_err) => {
                        tracing::warn!(error = %count_err, "failed to count saved posts");
                        0
                    }
                };
                JobTransition::Fail {
                    at,
                    detail: e.to_string(),
                    result_count: saved,
                }
            }
        };

        match self.store.update_job_status(job.id, transition).await {
            Ok(finished) => {
                tracing::info!(
                    status = %finished.status,
                    result_count = finished.result_count,
                    "job finished"
                );
                finished
            }
            Err(StoreError::Conflict { actual, .. }) if actual.is_terminal() => {
                tracing::warn!(
                    status = %actual,
                    "job was finished by another process; leaving its state as is"
                );
                self.store.load_job(job.id).await.unwrap_or(job)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to record final job status");
                self.fail_best_effort(job.id, format!("failed to record completion: {e}"))
                    .await;
                self.store.load_job(job.id).await.unwrap_or(job)
            }
        }
    }

    async fn fail_best_effort(&self, job_id: i64, detail: String) {
        let result_count = self.store.count_posts(job_id).await.unwrap_or(0);
        let transition = JobTransition::Fail {
            at: Utc::now(),
            detail,
            result_count,
        };
        if let Err(e) = self.store.update_job_status(job_id, transition).await {
            tracing::error!(job_id, error = %e, "failed to mark job as failed");
        }
    }

    async fn harvest_all(
        &self,
        job: &JobRun,
        collected: &mut HarvestAccumulator,
    ) -> Result<(), HarvestError> {
        let credentials = self.store.load_account(job.account_id).await?;

        let mut session = {
            let _account = self.sessions.lock_account(job.account_id).await;
            let saved = self.store.load_saved_session(job.account_id).await?;
            let mut session = self.sessions.acquire(&credentials, saved.as_ref()).await?;
            if session.is_fresh_login() {
                if let Err(e) = self.persist_session(&session).await {
                    self.sessions.release(&mut session).await;
                    return Err(e);
                }
            }
            session
        };

        let outcome = self.harvest_windows(job, &session, collected).await;
        self.sessions.release(&mut session).await;
        outcome
    }

    async fn persist_session(&self, session: &Session) -> Result<(), HarvestError> {
        let snapshot = self.sessions.capture(session).await?;
        self.store
            .save_session(session.account_id(), &snapshot, Utc::now())
            .await?;
        tracing::info!(
            cookies = snapshot.cookies.len(),
            "saved session state from fresh login"
        );
        Ok(())
    }

    async fn harvest_windows(
        &self,
        job: &JobRun,
        session: &Session,
        collected: &mut HarvestAccumulator,
    ) -> Result<(), HarvestError> {
        let windows = plan_windows(job.range.since, job.range.until, self.max_window_days);
        tracing::info!(windows = windows.len(), "planned harvest windows");

        for (index, window) in windows.iter().enumerate() {
            if self.store.should_stop(job.id).await? {
                tracing::info!(window = %window, "job cancelled or no longer running; stopping");
                return Err(HarvestError::Cancelled);
            }

            let found = self
                .harvester
                .harvest(session.page(), window, &job.targets, job.query_mode)
                .await?;
            let fresh = collected.absorb(found);
            let inserted = if fresh.is_empty() {
                0
            } else {
                self.store.append_posts(job.id, &fresh).await?
            };

            tracing::info!(
                window = %window,
                index = index + 1,
                of = windows.len(),
                new = fresh.len(),
                inserted,
                posts = collected.len(),
                "window complete"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "job_test.rs"]
mod tests;

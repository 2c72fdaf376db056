//! Browser session lifecycle for one account: restore or log in, capture,
//! release.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use xharvest_core::{AccountCredentials, AppConfig, SessionSnapshot};

use crate::browser::{BrowserLauncher, BrowserPage};
use crate::error::HarvestError;

const LOGIN_PATH: &str = "i/flow/login";
const USERNAME_INPUT: &str = r#"input[autocomplete="username"]"#;
const PASSWORD_INPUT: &str = r#"input[type="password"]"#;
const AUTHENTICATED_LANDING: &str = r#"[data-testid="primaryColumn"]"#;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_url: String,
    /// Upper bound on each wait during the login flow.
    pub login_timeout: Duration,
    /// Pause between login steps so the flow's transitions can render.
    pub step_delay: Duration,
}

impl SessionSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            login_timeout: Duration::from_secs(config.login_timeout_secs),
            step_delay: Duration::from_millis(config.login_step_delay_ms),
        }
    }
}

/// An open, authenticated browser page bound to one account.
pub struct Session {
    account_id: i64,
    page: Box<dyn BrowserPage>,
    fresh_login: bool,
    released: bool,
}

impl Session {
    #[must_use]
    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    #[must_use]
    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }

    /// True when this session came from an interactive login rather than
    /// restored state, so its state should be captured and saved.
    #[must_use]
    pub fn is_fresh_login(&self) -> bool {
        self.fresh_login
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .field("fresh_login", &self.fresh_login)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    settings: SessionSettings,
    account_locks: std::sync::Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: SessionSettings) -> Self {
        Self {
            launcher,
            settings,
            account_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Serializes session acquisition per account.
    ///
    /// Hold the guard from loading saved state until any freshly captured
    /// state is persisted, so concurrent jobs on one account never race on
    /// login or cookie capture.
    pub async fn lock_account(&self, account_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .account_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(account_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Opens a session for `credentials`.
    ///
    /// Saved state, when present, is restored directly without touching the
    /// login flow. Otherwise an interactive login runs; on failure the
    /// partially opened browser is torn down before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::AuthenticationFailed`] if the login flow does
    /// not reach an authenticated page, or a browser/timeout error from the
    /// launcher.
    pub async fn acquire(
        &self,
        credentials: &AccountCredentials,
        saved: Option<&SessionSnapshot>,
    ) -> Result<Session, HarvestError> {
        if let Some(snapshot) = saved.filter(|s| !s.is_empty()) {
            tracing::info!(account_id = credentials.id, "restoring saved session");
            let page = self.launcher.open(Some(snapshot)).await?;
            return Ok(Session {
                account_id: credentials.id,
                page,
                fresh_login: false,
                released: false,
            });
        }

        let Some(password) = credentials.password.as_deref() else {
            return Err(HarvestError::AuthenticationFailed {
                reason: format!(
                    "account {} has no saved session and no password",
                    credentials.username
                ),
            });
        };

        tracing::info!(account_id = credentials.id, "no saved session; logging in");
        let page = self.launcher.open(None).await?;
        if let Err(e) = self.login(page.as_ref(), &credentials.username, password).await {
            if let Err(close_err) = page.close().await {
                tracing::warn!(error = %close_err, "failed to close browser after login failure");
            }
            return Err(e);
        }

        tracing::info!(account_id = credentials.id, "login succeeded");
        Ok(Session {
            account_id: credentials.id,
            page,
            fresh_login: true,
            released: false,
        })
    }

    async fn login(
        &self,
        page: &dyn BrowserPage,
        username: &str,
        password: &str,
    ) -> Result<(), HarvestError> {
        let failed = |reason: String| HarvestError::AuthenticationFailed { reason };
        let timeout = self.settings.login_timeout;

        page.goto(&format!("{}{LOGIN_PATH}", self.settings.base_url))
            .await?;
        tokio::time::sleep(self.settings.step_delay).await;

        if !page.wait_for(USERNAME_INPUT, timeout).await? {
            return Err(failed("login form did not appear".to_string()));
        }
        page.fill_and_submit(USERNAME_INPUT, username).await?;
        tokio::time::sleep(self.settings.step_delay).await;

        if !page.wait_for(PASSWORD_INPUT, timeout).await? {
            return Err(failed(
                "password prompt did not appear after submitting username".to_string(),
            ));
        }
        page.fill_and_submit(PASSWORD_INPUT, password).await?;

        if !page.wait_for(AUTHENTICATED_LANDING, timeout).await? {
            return Err(failed(format!(
                "home timeline did not appear within {}s",
                timeout.as_secs()
            )));
        }
        if page.current_url().await?.contains(LOGIN_PATH) {
            return Err(failed("still on the login flow after submitting credentials".to_string()));
        }
        Ok(())
    }

    /// Snapshot of the session's cookies and storage for later reuse.
    ///
    /// # Errors
    ///
    /// Returns a browser error if the state cannot be read.
    pub async fn capture(&self, session: &Session) -> Result<SessionSnapshot, HarvestError> {
        session.page.storage_state().await
    }

    /// Closes the session's browser. Repeated calls are no-ops.
    pub async fn release(&self, session: &mut Session) {
        if session.released {
            return;
        }
        session.released = true;
        if let Err(e) = session.page.close().await {
            tracing::warn!(
                account_id = session.account_id,
                error = %e,
                "browser did not close cleanly"
            );
        }
    }
}

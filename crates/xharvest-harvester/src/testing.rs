//! Scripted browser and in-memory store shared by this crate's tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use xharvest_core::{
    AccountCredentials, ExtractedPost, JobRun, JobStatus, JobStore, JobTransition, NewJob,
    SessionSnapshot, StoreError, StoredCookie,
};

use crate::browser::{BrowserLauncher, BrowserPage};
use crate::error::HarvestError;
use crate::harvest::{EMPTY_STATE, LOGGED_OUT_MARKERS};

pub const BASE_URL: &str = "https://x.com/";
const USERNAME_INPUT: &str = r#"input[autocomplete="username"]"#;
const PASSWORD_INPUT: &str = r#"input[type="password"]"#;
const PRIMARY_COLUMN: &str = r#"[data-testid="primaryColumn"]"#;

/// Markup for one post container with the given id and author.
pub fn post_html(id: &str, author: &str) -> String {
    format!(
        r#"<article data-testid="tweet"><div data-testid="User-Name">@{author}</div><a href="/{author}/status/{id}"><time datetime="2024-11-20T10:00:00Z">t</time></a><div data-testid="tweetText">post {id}</div></article>"#
    )
}

/// Markup the extractor rejects: no status link.
pub fn chrome_html() -> String {
    r#"<article data-testid="tweet"><div data-testid="User-Name">@promo</div></article>"#.to_string()
}

/// What one search navigation renders.
#[derive(Debug, Clone, Default)]
pub struct SearchScript {
    /// Visible post containers after each scroll; the last entry repeats
    /// once exhausted and the page stops growing.
    pub batches: Vec<Vec<String>>,
    pub empty_state: bool,
    pub logged_out: bool,
    pub fail_navigation: bool,
    /// Page height grows on every scroll regardless of content.
    pub endless: bool,
}

impl SearchScript {
    pub fn batches(batches: Vec<Vec<String>>) -> Self {
        Self {
            batches,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct BrowserLog {
    pub opened_with: Vec<Option<SessionSnapshot>>,
    pub visits: Vec<String>,
    pub fills: Vec<(String, String)>,
    pub closes: usize,
    pub scrolls: usize,
}

/// A launcher whose pages replay [`SearchScript`]s in order, one per search
/// navigation.
pub struct FakeBrowser {
    pub scripts: Mutex<VecDeque<SearchScript>>,
    pub login_succeeds: bool,
    pub show_login_form: bool,
    pub fail_open: bool,
    pub captured: SessionSnapshot,
    pub log: Mutex<BrowserLog>,
}

impl FakeBrowser {
    pub fn new(scripts: Vec<SearchScript>) -> Arc<Self> {
        Self::with(scripts, |_| {})
    }

    pub fn with(scripts: Vec<SearchScript>, tweak: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut browser = Self {
            scripts: Mutex::new(scripts.into()),
            login_succeeds: true,
            show_login_form: true,
            fail_open: false,
            captured: sample_snapshot("fresh"),
            log: Mutex::new(BrowserLog::default()),
        };
        tweak(&mut browser);
        Arc::new(browser)
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, BrowserLog> {
        self.log.lock().unwrap()
    }
}

pub fn launcher(browser: &Arc<FakeBrowser>) -> Arc<dyn BrowserLauncher> {
    Arc::new(Arc::clone(browser))
}

pub fn sample_snapshot(token: &str) -> SessionSnapshot {
    SessionSnapshot {
        cookies: vec![StoredCookie {
            name: "auth_token".to_string(),
            value: token.to_string(),
            domain: ".x.com".to_string(),
            path: "/".to_string(),
            expires: -1.0,
            http_only: true,
            secure: true,
            same_site: None,
        }],
        origins: Vec::new(),
    }
}

#[async_trait]
impl BrowserLauncher for Arc<FakeBrowser> {
    async fn open(
        &self,
        saved: Option<&SessionSnapshot>,
    ) -> Result<Box<dyn BrowserPage>, HarvestError> {
        self.log().opened_with.push(saved.cloned());
        if self.fail_open {
            return Err(HarvestError::Browser("could not launch browser".to_string()));
        }
        Ok(Box::new(FakePage {
            browser: Arc::clone(self),
            state: Mutex::new(PageState {
                url: "about:blank".to_string(),
                ..PageState::default()
            }),
        }))
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    present: Vec<&'static str>,
    script: SearchScript,
    pass: usize,
    height: i64,
    closed: bool,
}

struct FakePage {
    browser: Arc<FakeBrowser>,
    state: Mutex<PageState>,
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<(), HarvestError> {
        self.browser.log().visits.push(url.to_string());
        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.present.clear();
        state.pass = 0;
        state.height = 1000;

        if url.contains("i/flow/login") {
            if self.browser.show_login_form {
                state.present.push(USERNAME_INPUT);
            }
            return Ok(());
        }

        if url.contains("/search?") {
            let script = self
                .browser
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            if script.fail_navigation {
                return Err(HarvestError::NavigationTimeout {
                    url: url.to_string(),
                    secs: 30,
                });
            }
            if script.empty_state {
                state.present.push(EMPTY_STATE);
            }
            if script.logged_out {
                state.present.push(LOGGED_OUT_MARKERS[0]);
            }
            state.script = script;
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, HarvestError> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn exists(&self, css: &str) -> Result<bool, HarvestError> {
        Ok(self.state.lock().unwrap().present.iter().any(|p| *p == css))
    }

    async fn fill_and_submit(&self, css: &str, value: &str) -> Result<(), HarvestError> {
        self.browser
            .log()
            .fills
            .push((css.to_string(), value.to_string()));
        let mut state = self.state.lock().unwrap();
        if css == USERNAME_INPUT {
            state.present = vec![PASSWORD_INPUT];
        } else if css == PASSWORD_INPUT {
            state.present.clear();
            if self.browser.login_succeeds {
                state.present.push(PRIMARY_COLUMN);
                state.url = format!("{BASE_URL}home");
            }
        }
        Ok(())
    }

    async fn outer_html_all(&self, css: &str) -> Result<Vec<String>, HarvestError> {
        assert_eq!(css, crate::extract::POST_SELECTOR);
        let state = self.state.lock().unwrap();
        let batches = &state.script.batches;
        if batches.is_empty() {
            return Ok(Vec::new());
        }
        Ok(batches[state.pass.min(batches.len() - 1)].clone())
    }

    async fn scroll_height(&self) -> Result<i64, HarvestError> {
        Ok(self.state.lock().unwrap().height)
    }

    async fn scroll_to_bottom(&self) -> Result<(), HarvestError> {
        self.browser.log().scrolls += 1;
        let mut state = self.state.lock().unwrap();
        if state.script.endless || state.pass + 1 < state.script.batches.len() {
            state.pass += 1;
            state.height += 1000;
        }
        Ok(())
    }

    async fn storage_state(&self) -> Result<SessionSnapshot, HarvestError> {
        Ok(self.browser.captured.clone())
    }

    async fn close(&self) -> Result<(), HarvestError> {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            self.browser.log().closes += 1;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryInner {
    pub jobs: HashMap<i64, JobRun>,
    pub posts: HashMap<i64, Vec<ExtractedPost>>,
    pub sessions: HashMap<i64, (SessionSnapshot, DateTime<Utc>)>,
    pub accounts: HashMap<i64, AccountCredentials>,
    pub next_id: i64,
    /// Fail `append_posts` on this call number (1-based).
    pub fail_append_call: Option<usize>,
    pub append_calls: usize,
    /// Request cancellation once this many posts are saved.
    pub cancel_after_posts: Option<usize>,
    /// Fail the job from outside the runner once this many posts are saved.
    pub fail_after_posts: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn with_account(password: Option<&str>) -> Arc<Self> {
        let store = Self::default();
        store.inner.lock().unwrap().accounts.insert(
            1,
            AccountCredentials {
                id: 1,
                username: "harvester".to_string(),
                password: password.map(str::to_string),
            },
        );
        Arc::new(store)
    }

    pub fn saved_ids(&self, job_id: i64) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .posts
            .get(&job_id)
            .map(|posts| posts.iter().map(|p| p.external_id.clone()).collect())
            .unwrap_or_default()
    }
}

fn not_found(entity: &'static str, id: i64) -> StoreError {
    StoreError::NotFound { entity, id }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: &NewJob) -> Result<JobRun, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let run = JobRun {
            id: inner.next_id,
            public_id: Uuid::new_v4(),
            name: job.name.clone(),
            account_id: job.account_id,
            targets: job.targets.clone(),
            query_mode: job.query_mode,
            range: job.range,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            error_detail: None,
            result_count: 0,
            cancel_requested: false,
            created_at: Utc::now(),
        };
        inner.jobs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn load_job(&self, id: i64) -> Result<JobRun, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner.jobs.get(&id).cloned().ok_or(not_found("job", id))
    }

    async fn update_job_status(
        &self,
        id: i64,
        transition: JobTransition,
    ) -> Result<JobRun, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.jobs.get_mut(&id).ok_or(not_found("job", id))?;
        if job.status != transition.required_status() {
            return Err(StoreError::Conflict {
                id,
                expected: transition.required_status(),
                actual: job.status,
            });
        }
        job.status = transition.target_status();
        match transition {
            JobTransition::Start { at } => job.started_at = Some(at),
            JobTransition::Complete { at, result_count } => {
                job.completed_at = Some(at);
                job.result_count = result_count;
            }
            JobTransition::Fail {
                at,
                detail,
                result_count,
            } => {
                job.completed_at = Some(at);
                job.error_detail = Some(detail);
                job.result_count = result_count;
            }
        }
        Ok(job.clone())
    }

    async fn append_posts(&self, job_id: i64, posts: &[ExtractedPost]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.append_calls += 1;
        if inner.fail_append_call == Some(inner.append_calls) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        let status = inner.jobs.get(&job_id).ok_or(not_found("job", job_id))?.status;
        if status != JobStatus::Running {
            return Err(StoreError::Conflict {
                id: job_id,
                expected: JobStatus::Running,
                actual: status,
            });
        }
        let saved = inner.posts.entry(job_id).or_default();
        let mut inserted = 0;
        for post in posts {
            if !saved.iter().any(|p| p.external_id == post.external_id) {
                saved.push(post.clone());
                inserted += 1;
            }
        }
        let total = saved.len();
        let cancel = inner.cancel_after_posts.is_some_and(|n| total >= n);
        let fail = inner.fail_after_posts.is_some_and(|n| total >= n);
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            if cancel {
                job.cancel_requested = true;
            }
            if fail {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                job.error_detail = Some("interrupted elsewhere".to_string());
                job.result_count = i64::try_from(total).unwrap();
            }
        }
        Ok(inserted)
    }

    async fn count_posts(&self, job_id: i64) -> Result<i64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .posts
            .get(&job_id)
            .map_or(0, |p| i64::try_from(p.len()).unwrap()))
    }

    async fn load_account(&self, account_id: i64) -> Result<AccountCredentials, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(not_found("account", account_id))
    }

    async fn load_saved_session(
        &self,
        account_id: i64,
    ) -> Result<Option<SessionSnapshot>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.sessions.get(&account_id).map(|(s, _)| s.clone()))
    }

    async fn save_session(
        &self,
        account_id: i64,
        snapshot: &SessionSnapshot,
        login_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .sessions
            .insert(account_id, (snapshot.clone(), login_at));
        Ok(())
    }

    async fn clear_session(&self, account_id: i64) -> Result<(), StoreError> {
        self.inner.lock().unwrap().sessions.remove(&account_id);
        Ok(())
    }

    async fn request_cancel(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.jobs.get_mut(&id).ok_or(not_found("job", id))?;
        if job.status != JobStatus::Running {
            return Err(StoreError::Conflict {
                id,
                expected: JobStatus::Running,
                actual: job.status,
            });
        }
        job.cancel_requested = true;
        Ok(())
    }

    async fn should_stop(&self, id: i64) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .get(&id)
            .is_some_and(|j| j.cancel_requested || j.status != JobStatus::Running))
    }
}

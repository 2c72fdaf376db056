use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use xharvest_core::{DateRange, NewJob, QueryMode};

use super::*;
use crate::extract::extract_post;
use crate::testing::{
    launcher, post_html, sample_snapshot, FakeBrowser, MemoryStore, SearchScript, BASE_URL,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn runner(store: &Arc<MemoryStore>, browser: &Arc<FakeBrowser>) -> JobRunner {
    let sessions = SessionManager::new(
        launcher(browser),
        SessionSettings {
            base_url: BASE_URL.to_string(),
            login_timeout: Duration::from_secs(30),
            step_delay: Duration::from_millis(2000),
        },
    );
    let harvester = ScrollHarvester::new(HarvestSettings {
        base_url: BASE_URL.to_string(),
        settle_delay: Duration::from_millis(5000),
        scroll_delay: Duration::from_millis(3000),
        max_stalled_scrolls: 3,
        max_scroll_passes: 50,
    });
    JobRunner::new(Arc::clone(store) as Arc<dyn JobStore>, sessions, harvester, 10)
}

async fn create_job(store: &MemoryStore, since: NaiveDate, until: NaiveDate) -> JobRun {
    let request = NewJob {
        name: String::new(),
        account_id: 1,
        targets: vec!["alice".to_string()],
        query_mode: QueryMode::From,
        range: DateRange { since, until },
    };
    store.create_job(&request).await.unwrap()
}

fn posts(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| post_html(id, "alice")).collect()
}

fn search_visits(browser: &FakeBrowser) -> usize {
    browser
        .log()
        .visits
        .iter()
        .filter(|v| v.contains("/search?"))
        .count()
}

#[tokio::test(start_paused = true)]
async fn short_range_runs_one_window_to_completion() {
    let store = MemoryStore::with_account(Some("hunter2"));
    let browser = FakeBrowser::new(vec![SearchScript::batches(vec![
        posts(&["1", "2"]),
        posts(&["2", "3"]),
    ])]);
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;
    assert_eq!(job.status, JobStatus::Pending);

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result_count, 3);
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    assert!(done.error_detail.is_none());
    assert_eq!(search_visits(&browser), 1);
    assert_eq!(store.saved_ids(job.id), vec!["1", "2", "3"]);
    assert_eq!(browser.log().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_login_state_is_saved_to_account() {
    let store = MemoryStore::with_account(Some("hunter2"));
    let browser = FakeBrowser::new(vec![SearchScript::batches(vec![posts(&["1"])])]);
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;

    runner(&store, &browser).run(job.id).await.unwrap();

    let fills = browser.log().fills.clone();
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[0].1, "harvester");
    assert_eq!(fills[1].1, "hunter2");
    let saved = store.load_saved_session(1).await.unwrap().expect("saved");
    assert_eq!(saved, sample_snapshot("fresh"));
}

#[tokio::test(start_paused = true)]
async fn saved_session_skips_login() {
    let store = MemoryStore::with_account(None);
    store
        .save_session(1, &sample_snapshot("saved"), chrono::Utc::now())
        .await
        .unwrap();
    let browser = FakeBrowser::new(vec![SearchScript::batches(vec![posts(&["1"])])]);
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    let log = browser.log();
    assert_eq!(log.opened_with, vec![Some(sample_snapshot("saved"))]);
    assert!(log.fills.is_empty());
    assert!(!log.visits.iter().any(|v| v.contains("i/flow/login")));
    drop(log);
    let kept = store.load_saved_session(1).await.unwrap().unwrap();
    assert_eq!(kept, sample_snapshot("saved"));
}

#[tokio::test(start_paused = true)]
async fn starting_twice_is_a_conflict() {
    let store = MemoryStore::with_account(Some("pw"));
    let browser = FakeBrowser::new(Vec::new());
    let runner = runner(&store, &browser);
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;

    let running = runner.begin(job.id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);

    let err = runner.begin(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        StartError::Conflict {
            status: JobStatus::Running,
            ..
        }
    ));
    let unchanged = store.load_job(job.id).await.unwrap();
    assert_eq!(unchanged.status, JobStatus::Running);
    assert_eq!(unchanged.started_at, running.started_at);
}

#[tokio::test(start_paused = true)]
async fn terminal_job_cannot_restart() {
    let store = MemoryStore::with_account(Some("pw"));
    let browser = FakeBrowser::new(vec![SearchScript::batches(vec![posts(&["1"])])]);
    let runner = runner(&store, &browser);
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;
    runner.run(job.id).await.unwrap();

    let err = runner.run(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        StartError::Conflict {
            status: JobStatus::Completed,
            ..
        }
    ));
    assert_eq!(search_visits(&browser), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_job_is_a_store_error() {
    let store = MemoryStore::with_account(Some("pw"));
    let browser = FakeBrowser::new(Vec::new());
    let err = runner(&store, &browser).begin(404).await.unwrap_err();
    assert!(matches!(err, StartError::Store(StoreError::NotFound { .. })));
}

#[tokio::test(start_paused = true)]
async fn failure_in_third_window_keeps_earlier_posts() {
    let store = MemoryStore::with_account(Some("pw"));
    let browser = FakeBrowser::new(vec![
        SearchScript::batches(vec![posts(&["a", "b"])]),
        SearchScript::batches(vec![posts(&["b", "c"])]),
        SearchScript {
            fail_navigation: true,
            ..SearchScript::default()
        },
    ]);
    // 28 days at 10 per window: three windows.
    let job = create_job(&store, date(2024, 1, 1), date(2024, 1, 29)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    let detail = done.error_detail.as_deref().unwrap();
    assert!(detail.contains("timed out"), "detail: {detail}");
    assert_eq!(done.result_count, 3);
    assert_eq!(store.saved_ids(job.id), vec!["a", "b", "c"]);
    assert_eq!(search_visits(&browser), 3);
    assert_eq!(browser.log().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn windows_run_in_chronological_order() {
    let store = MemoryStore::with_account(Some("pw"));
    let browser = FakeBrowser::new(vec![
        SearchScript::batches(vec![posts(&["1"])]),
        SearchScript::batches(vec![posts(&["2"])]),
        SearchScript::batches(vec![posts(&["3"])]),
    ]);
    let job = create_job(&store, date(2024, 1, 1), date(2024, 1, 29)).await;
    runner(&store, &browser).run(job.id).await.unwrap();

    let visits: Vec<String> = browser
        .log()
        .visits
        .iter()
        .filter(|v| v.contains("/search?"))
        .cloned()
        .collect();
    assert!(visits[0].contains("since%3A2024-01-01"));
    assert!(visits[1].contains("since%3A2024-01-11"));
    assert!(visits[2].contains("since%3A2024-01-21"));
    assert!(visits[2].contains("until%3A2024-01-29"));
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_fails_job_with_prior_windows_saved() {
    let store = MemoryStore::with_account(Some("pw"));
    store.inner.lock().unwrap().fail_append_call = Some(2);
    let browser = FakeBrowser::new(vec![
        SearchScript::batches(vec![posts(&["1"])]),
        SearchScript::batches(vec![posts(&["2"])]),
        SearchScript::batches(vec![posts(&["3"])]),
    ]);
    let job = create_job(&store, date(2024, 1, 1), date(2024, 1, 29)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error_detail.unwrap().contains("connection reset"));
    assert_eq!(done.result_count, 1);
    assert_eq!(store.saved_ids(job.id), vec!["1"]);
    assert_eq!(search_visits(&browser), 2);
}

#[tokio::test(start_paused = true)]
async fn expired_session_fails_job_and_clears_saved_state() {
    let store = MemoryStore::with_account(Some("pw"));
    store
        .save_session(1, &sample_snapshot("stale"), chrono::Utc::now())
        .await
        .unwrap();
    let browser = FakeBrowser::new(vec![SearchScript {
        logged_out: true,
        ..SearchScript::default()
    }]);
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error_detail.unwrap().contains("session expired"));
    assert!(store.load_saved_session(1).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_login_tears_down_browser() {
    let store = MemoryStore::with_account(Some("wrong"));
    let browser = FakeBrowser::with(Vec::new(), |b| b.login_succeeds = false);
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done
        .error_detail
        .unwrap()
        .starts_with("authentication failed"));
    assert_eq!(done.result_count, 0);
    assert_eq!(browser.log().closes, 1);
    assert_eq!(search_visits(&browser), 0);
    assert!(store.load_saved_session(1).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn missing_login_form_is_authentication_failure() {
    let store = MemoryStore::with_account(Some("pw"));
    let browser = FakeBrowser::with(Vec::new(), |b| b.show_login_form = false);
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert!(done.error_detail.unwrap().contains("login form did not appear"));
    assert_eq!(browser.log().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn no_session_and_no_password_never_opens_browser() {
    let store = MemoryStore::with_account(None);
    let browser = FakeBrowser::new(Vec::new());
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error_detail.unwrap().contains("no password"));
    assert!(browser.log().opened_with.is_empty());
}

#[tokio::test(start_paused = true)]
async fn browser_launch_failure_fails_job() {
    let store = MemoryStore::with_account(Some("pw"));
    let browser = FakeBrowser::with(Vec::new(), |b| b.fail_open = true);
    let job = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error_detail.unwrap().contains("could not launch browser"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_is_checked_between_windows() {
    let store = MemoryStore::with_account(Some("pw"));
    store.inner.lock().unwrap().cancel_after_posts = Some(1);
    let browser = FakeBrowser::new(vec![
        SearchScript::batches(vec![posts(&["1"])]),
        SearchScript::batches(vec![posts(&["2"])]),
    ]);
    let job = create_job(&store, date(2024, 1, 1), date(2024, 1, 15)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error_detail.as_deref(), Some("cancelled by request"));
    assert_eq!(done.result_count, 1);
    assert_eq!(search_visits(&browser), 1);
    assert_eq!(browser.log().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn job_failed_elsewhere_stops_at_next_window() {
    let store = MemoryStore::with_account(Some("pw"));
    store.inner.lock().unwrap().fail_after_posts = Some(1);
    let browser = FakeBrowser::new(vec![
        SearchScript::batches(vec![posts(&["1"])]),
        SearchScript::batches(vec![posts(&["2"])]),
    ]);
    let job = create_job(&store, date(2024, 1, 1), date(2024, 1, 15)).await;

    let done = runner(&store, &browser).run(job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error_detail.as_deref(), Some("interrupted elsewhere"));
    assert_eq!(done.result_count, 1);
    assert_eq!(search_visits(&browser), 1);
    assert_eq!(store.saved_ids(job.id), vec!["1"]);
    assert_eq!(store.inner.lock().unwrap().append_calls, 1);
    assert_eq!(browser.log().closes, 1);
}

#[tokio::test]
async fn posts_are_refused_once_job_is_terminal() {
    let store = MemoryStore::with_account(Some("pw"));
    let job = create_job(&store, date(2024, 1, 1), date(2024, 1, 2)).await;
    let post = extract_post(&post_html("1", "alice"), BASE_URL).unwrap();

    let err = store.append_posts(job.id, &[post]).await.unwrap_err();

    assert!(matches!(
        err,
        StoreError::Conflict {
            actual: JobStatus::Pending,
            ..
        }
    ));
    assert!(store.should_stop(job.id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn concurrent_jobs_on_one_account_log_in_once() {
    let store = MemoryStore::with_account(Some("pw"));
    let browser = FakeBrowser::new(vec![
        SearchScript::batches(vec![posts(&["1"])]),
        SearchScript::batches(vec![posts(&["2"])]),
    ]);
    let runner = Arc::new(runner(&store, &browser));
    let first = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;
    let second = create_job(&store, date(2024, 11, 20), date(2024, 11, 22)).await;

    let a = tokio::spawn({
        let runner = Arc::clone(&runner);
        async move { runner.run(first.id).await.unwrap() }
    });
    let b = tokio::spawn({
        let runner = Arc::clone(&runner);
        async move { runner.run(second.id).await.unwrap() }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.status, JobStatus::Completed);
    assert_eq!(b.status, JobStatus::Completed);
    let log = browser.log();
    let logins = log.visits.iter().filter(|v| v.contains("i/flow/login")).count();
    assert_eq!(logins, 1);
    assert_eq!(log.opened_with.iter().filter(|s| s.is_some()).count(), 1);
}

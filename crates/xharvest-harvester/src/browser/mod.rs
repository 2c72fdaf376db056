//! The browser surface the harvester drives.
//!
//! Everything above this module talks to a [`BrowserPage`] trait object, so
//! the session, harvest and job logic run unchanged against a real Chromium
//! page or an in-memory fake.

pub mod chromium;

use std::time::Duration;

use async_trait::async_trait;
use xharvest_core::SessionSnapshot;

use crate::error::HarvestError;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One open tab inside its own browser context.
///
/// Every method is bounded by a timeout in the implementation; none may
/// block indefinitely.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigates and waits for the load to finish.
    async fn goto(&self, url: &str) -> Result<(), HarvestError>;

    async fn current_url(&self) -> Result<String, HarvestError>;

    /// Whether at least one element currently matches `css`.
    async fn exists(&self, css: &str) -> Result<bool, HarvestError>;

    /// Polls until `css` matches or `timeout` elapses. Returns whether it matched.
    async fn wait_for(&self, css: &str, timeout: Duration) -> Result<bool, HarvestError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.exists(css).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Types `value` into the first element matching `css` and presses Enter.
    async fn fill_and_submit(&self, css: &str, value: &str) -> Result<(), HarvestError>;

    /// Outer HTML of every element matching `css`, in document order.
    async fn outer_html_all(&self, css: &str) -> Result<Vec<String>, HarvestError>;

    async fn scroll_height(&self) -> Result<i64, HarvestError>;

    async fn scroll_to_bottom(&self) -> Result<(), HarvestError>;

    /// Cookies and local storage of the page's context.
    async fn storage_state(&self) -> Result<SessionSnapshot, HarvestError>;

    /// Tears down the page and its browser. Safe to call more than once.
    async fn close(&self) -> Result<(), HarvestError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Opens a fresh page, restoring `saved` state into its context first
    /// when given.
    async fn open(
        &self,
        saved: Option<&SessionSnapshot>,
    ) -> Result<Box<dyn BrowserPage>, HarvestError>;
}

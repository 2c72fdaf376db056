//! The infinite-scroll loop that drains one search window.

use std::collections::HashSet;
use std::time::Duration;

use xharvest_core::{AppConfig, ExtractedPost, QueryMode};

use crate::browser::BrowserPage;
use crate::error::HarvestError;
use crate::extract::{extract_post, POST_SELECTOR};
use crate::query::{build_query, build_search_url};
use crate::window::HarvestWindow;

pub(crate) const EMPTY_STATE: &str = r#"[data-testid="empty_state_header_text"]"#;
pub(crate) const LOGGED_OUT_MARKERS: &[&str] = &[
    r#"[data-testid="loginButton"]"#,
    r#"a[href="/login"]"#,
];
const LOGGED_OUT_PATHS: &[&str] = &["i/flow/login", "/login"];

/// Tuning for the scroll loop. The stall heuristic is best-effort: slow
/// pages can end a window early, so delays and limits are configurable.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub base_url: String,
    /// Wait after navigation before the first extraction pass.
    pub settle_delay: Duration,
    /// Wait after each scroll before measuring growth.
    pub scroll_delay: Duration,
    /// Consecutive scrolls without page growth that end a window.
    pub max_stalled_scrolls: u32,
    /// Hard cap on scrolls per window.
    pub max_scroll_passes: u32,
}

impl HarvestSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            scroll_delay: Duration::from_millis(config.scroll_delay_ms),
            max_stalled_scrolls: config.max_stalled_scrolls,
            max_scroll_passes: config.max_scroll_passes,
        }
    }
}

/// Posts collected so far, unique by `external_id`, in discovery order.
///
/// Owned by whoever drives the harvest; nothing here outlives one job.
#[derive(Debug, Default, Clone)]
pub struct HarvestAccumulator {
    seen: HashSet<String>,
    posts: Vec<ExtractedPost>,
}

impl HarvestAccumulator {
    /// Adds `post` unless its id is already present. Returns whether it was new.
    pub fn insert(&mut self, post: ExtractedPost) -> bool {
        if self.seen.insert(post.external_id.clone()) {
            self.posts.push(post);
            true
        } else {
            false
        }
    }

    /// Unions `other` into `self`, returning the posts that were new here.
    pub fn absorb(&mut self, other: HarvestAccumulator) -> Vec<ExtractedPost> {
        let mut fresh = Vec::new();
        for post in other.posts {
            if self.seen.insert(post.external_id.clone()) {
                fresh.push(post.clone());
                self.posts.push(post);
            }
        }
        fresh
    }

    #[must_use]
    pub fn contains(&self, external_id: &str) -> bool {
        self.seen.contains(external_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    #[must_use]
    pub fn posts(&self) -> &[ExtractedPost] {
        &self.posts
    }

    #[must_use]
    pub fn into_posts(self) -> Vec<ExtractedPost> {
        self.posts
    }
}

#[derive(Debug, Clone)]
pub struct ScrollHarvester {
    settings: HarvestSettings,
}

impl ScrollHarvester {
    #[must_use]
    pub fn new(settings: HarvestSettings) -> Self {
        Self { settings }
    }

    /// Collects every post the search returns for `window`.
    ///
    /// An explicit "no results" page is a successful empty result.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::SessionExpired`] when the first pass finds no
    /// posts on a page showing logged-out markers, or any browser/timeout
    /// error raised while driving the page.
    pub async fn harvest(
        &self,
        page: &dyn BrowserPage,
        window: &HarvestWindow,
        targets: &[String],
        mode: QueryMode,
    ) -> Result<HarvestAccumulator, HarvestError> {
        let query = build_query(targets, mode, window);
        let url = build_search_url(&self.settings.base_url, &query)?;
        tracing::debug!(window = %window, query = %query, "opening search");

        page.goto(&url).await?;
        tokio::time::sleep(self.settings.settle_delay).await;

        let mut found = HarvestAccumulator::default();
        if page.exists(EMPTY_STATE).await? {
            tracing::info!(window = %window, "search reports no results");
            return Ok(found);
        }

        let mut stalled = 0u32;
        let mut passes = 0u32;
        loop {
            let fragments = page.outer_html_all(POST_SELECTOR).await?;
            let added = self.absorb_visible(&mut found, &fragments);

            if passes == 0
                && found.is_empty()
                && fragments.is_empty()
                && looks_logged_out(page).await?
            {
                return Err(HarvestError::SessionExpired);
            }

            tracing::debug!(
                window = %window,
                pass = passes,
                visible = fragments.len(),
                added,
                posts = found.len(),
                stalled,
                "scroll pass"
            );

            if stalled >= self.settings.max_stalled_scrolls {
                break;
            }
            if passes >= self.settings.max_scroll_passes {
                tracing::warn!(
                    window = %window,
                    passes,
                    posts = found.len(),
                    "scroll pass limit reached; ending window early"
                );
                break;
            }

            let before = page.scroll_height().await?;
            page.scroll_to_bottom().await?;
            tokio::time::sleep(self.settings.scroll_delay).await;
            let after = page.scroll_height().await?;
            passes += 1;

            if after == before {
                stalled += 1;
            } else {
                stalled = 0;
            }
        }

        tracing::info!(window = %window, posts = found.len(), passes, "window exhausted");
        Ok(found)
    }

    /// Extracts each visible post, keeping only ids not yet seen.
    fn absorb_visible(&self, found: &mut HarvestAccumulator, fragments: &[String]) -> usize {
        let mut added = 0;
        for html in fragments {
            match extract_post(html, &self.settings.base_url) {
                Some(post) => {
                    if found.insert(post) {
                        added += 1;
                    }
                }
                None => tracing::trace!("skipping unreadable post element"),
            }
        }
        added
    }
}

async fn looks_logged_out(page: &dyn BrowserPage) -> Result<bool, HarvestError> {
    let url = page.current_url().await?;
    if LOGGED_OUT_PATHS.iter().any(|p| url.contains(p)) {
        return Ok(true);
    }
    for marker in LOGGED_OUT_MARKERS {
        if page.exists(marker).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
#[path = "harvest_test.rs"]
mod tests;

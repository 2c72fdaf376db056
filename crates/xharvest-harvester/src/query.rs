//! Search query and result-page URL construction.

use url::Url;
use xharvest_core::QueryMode;

use crate::error::HarvestError;
use crate::window::HarvestWindow;

/// Builds the search expression for `targets` under `mode`, bounded by the
/// window: `(from:a OR from:b) until:2024-01-15 since:2024-01-01`.
///
/// The window end is exclusive, which matches the site's `until:` operator.
#[must_use]
pub fn build_query(targets: &[String], mode: QueryMode, window: &HarvestWindow) -> String {
    let clauses: Vec<String> = targets
        .iter()
        .map(|handle| match mode {
            QueryMode::From => format!("from:{handle}"),
            QueryMode::To => format!("to:{handle}"),
            QueryMode::Mentioning => format!("@{handle}"),
        })
        .collect();

    format!(
        "({}) until:{} since:{}",
        clauses.join(" OR "),
        window.end.format("%Y-%m-%d"),
        window.start.format("%Y-%m-%d")
    )
}

/// Latest-first search results URL for `query` under `base_url`.
///
/// # Errors
///
/// Returns [`HarvestError::Browser`] if `base_url` is not a valid absolute URL.
pub fn build_search_url(base_url: &str, query: &str) -> Result<String, HarvestError> {
    let base = Url::parse(base_url)
        .map_err(|e| HarvestError::Browser(format!("invalid base URL {base_url}: {e}")))?;
    let mut url = base
        .join("search")
        .map_err(|e| HarvestError::Browser(format!("cannot build search URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("q", query)
        .append_pair("src", "typed_query")
        .append_pair("f", "live");
    Ok(url.into())
}

//! Reads one rendered post container into an [`ExtractedPost`].

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use xharvest_core::{ExtractedPost, PostMetrics};

use crate::metrics::parse_metric;

/// Container selector for one post in a result timeline.
pub const POST_SELECTOR: &str = r#"article[data-testid="tweet"]"#;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static CSS selector is valid")
}

static STATUS_LINK: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href*="/status/"]"#));
static USER_NAME: LazyLock<Selector> = LazyLock::new(|| selector(r#"[data-testid="User-Name"]"#));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("time[datetime]"));
static TEXT: LazyLock<Selector> = LazyLock::new(|| selector(r#"[data-testid="tweetText"]"#));
static REPLY: LazyLock<Selector> = LazyLock::new(|| selector(r#"[data-testid="reply"]"#));
static RESHARE: LazyLock<Selector> = LazyLock::new(|| selector(r#"[data-testid="retweet"]"#));
static LIKE: LazyLock<Selector> = LazyLock::new(|| selector(r#"[data-testid="like"]"#));
static VIEWS: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href*="/analytics"]"#));
static IMAGE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"img[src*="pbs.twimg.com/media"]"#));
static VIDEO: LazyLock<Selector> = LazyLock::new(|| selector("video"));
static SPAN: LazyLock<Selector> = LazyLock::new(|| selector("span"));
static SOCIAL_CONTEXT: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"[data-testid="socialContext"]"#));
static HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)").expect("static handle regex is valid"));

/// Extracts a post from the outer HTML of one post container.
///
/// Returns `None` when the element has no detail-page link or no resolvable
/// author handle; such elements are timeline chrome, not posts. A missing
/// timestamp does not drop the post.
#[must_use]
pub fn extract_post(outer_html: &str, base_url: &str) -> Option<ExtractedPost> {
    let fragment = Html::parse_fragment(outer_html);
    let root = fragment.root_element();

    let external_id = root
        .select(&STATUS_LINK)
        .find_map(|link| link.value().attr("href").and_then(status_id))?;
    let author_handle = author_handle(root)?;

    let published_at = root
        .select(&TIME)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let text = root.select(&TEXT).next().map(text_of).unwrap_or_default();

    let metrics = PostMetrics {
        replies: metric(root, &REPLY),
        reshares: metric(root, &RESHARE),
        likes: metric(root, &LIKE),
        views: metric(root, &VIEWS),
    };

    let canonical_url = format!(
        "{}/{author_handle}/status/{external_id}",
        base_url.trim_end_matches('/')
    );

    Some(ExtractedPost {
        has_image: root.select(&IMAGE).next().is_some(),
        has_video: root.select(&VIDEO).next().is_some(),
        is_reshare: is_reshare(root),
        is_quote: root.select(&SPAN).any(|s| text_of(s) == "Quote"),
        external_id,
        author_handle,
        text,
        published_at,
        metrics,
        canonical_url,
    })
}

/// Post id from a detail link such as `/alice/status/123?s=20`.
fn status_id(href: &str) -> Option<String> {
    let (_, rest) = href.split_once("/status/")?;
    let id = rest.split(['/', '?', '#']).next().unwrap_or_default().trim();
    (!id.is_empty()).then(|| id.to_string())
}

fn author_handle(root: ElementRef<'_>) -> Option<String> {
    let user = root.select(&USER_NAME).next()?;
    let text: String = user.text().collect();
    HANDLE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn metric(root: ElementRef<'_>, selector: &Selector) -> u64 {
    root.select(selector)
        .next()
        .map_or(0, |el| parse_metric(&text_of(el)))
}

fn is_reshare(root: ElementRef<'_>) -> bool {
    let marks = |text: String| {
        let lower = text.to_lowercase();
        lower.contains("retweeted") || lower.contains("reposted")
    };
    root.select(&SOCIAL_CONTEXT).any(|el| marks(text_of(el)))
        || root.select(&SPAN).any(|el| marks(text_of(el)))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
#[path = "extract_test.rs"]
mod tests;

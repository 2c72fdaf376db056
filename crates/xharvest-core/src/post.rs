use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engagement counters shown on a post, already normalized to integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub replies: u64,
    pub reshares: u64,
    pub likes: u64,
    pub views: u64,
}

/// One post pulled from a rendered result page.
///
/// `external_id` is the dedup key within a job's result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPost {
    pub external_id: String,
    pub author_handle: String,
    pub text: String,
    /// `None` when the element carried no machine-readable timestamp.
    pub published_at: Option<DateTime<Utc>>,
    pub metrics: PostMetrics,
    pub has_image: bool,
    pub has_video: bool,
    pub is_reshare: bool,
    pub is_quote: bool,
    pub canonical_url: String,
}

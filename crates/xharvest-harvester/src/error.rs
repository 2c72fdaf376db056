use thiserror::Error;
use xharvest_core::StoreError;

/// Failures that end a harvest job.
///
/// Per-post extraction problems are not represented here: the extractor
/// returns `None` for posts it cannot read and the batch carries on.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("session expired: search results show a logged-out page")]
    SessionExpired,

    #[error("navigation to {url} timed out after {secs}s")]
    NavigationTimeout { url: String, secs: u64 },

    #[error("{operation} timed out after {secs}s")]
    RenderTimeout { operation: String, secs: u64 },

    #[error("browser error: {0}")]
    Browser(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cancelled by request")]
    Cancelled,
}

impl HarvestError {
    /// True when the account's saved session state can no longer be trusted.
    #[must_use]
    pub fn is_session_loss(&self) -> bool {
        matches!(self, HarvestError::SessionExpired)
    }
}

//! Captured browser session state, stored on the account record.
//!
//! The JSON shape mirrors the common browser "storage state" layout so that
//! state captured by other tooling can be pasted into an account as-is:
//!
//! ```json
//! {
//!   "cookies": [{"name": "auth_token", "value": "...", "domain": ".x.com",
//!                "path": "/", "expires": 1767225600.0, "httpOnly": true,
//!                "secure": true, "sameSite": "None"}],
//!   "origins": [{"origin": "https://x.com",
//!                "localStorage": [{"name": "k", "value": "v"}]}]
//! }
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<OriginStorage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Seconds since the epoch; `-1` marks a session cookie.
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginStorage {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

fn default_path() -> String {
    "/".to_string()
}

fn session_expiry() -> f64 {
    -1.0
}

impl SessionSnapshot {
    /// An empty snapshot carries no credentials and counts as "no saved state".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.origins.iter().all(|o| o.local_storage.is_empty())
    }

    /// Parses a stored JSON value, treating `null`, `{}` and empty snapshots as absent.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] when the value has the
    /// wrong shape.
    pub fn from_stored(value: Option<serde_json::Value>) -> Result<Option<Self>, serde_json::Error> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let snapshot: SessionSnapshot = serde_json::from_value(value)?;
        Ok((!snapshot.is_empty()).then_some(snapshot))
    }
}

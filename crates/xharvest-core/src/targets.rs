use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::job::normalize_handle;
use crate::ConfigError;

static HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").expect("valid handle regex"));

/// True for a plain account handle: letters, digits and underscores, at
/// most 15 characters, without a leading `@`.
#[must_use]
pub fn is_valid_handle(handle: &str) -> bool {
    HANDLE_RE.is_match(handle)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub username: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TargetsFile {
    pub targets: Vec<TargetConfig>,
}

/// Load and validate the search-target seed file.
///
/// Usernames are normalized (leading `@` stripped) before validation.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_targets(path: &Path) -> Result<TargetsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::TargetsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_targets(&content)
}

fn parse_targets(content: &str) -> Result<TargetsFile, ConfigError> {
    let mut file: TargetsFile = serde_yaml::from_str(content)?;

    for target in &mut file.targets {
        target.username = normalize_handle(&target.username).unwrap_or_default();
    }

    validate_targets(&file)?;
    Ok(file)
}

fn validate_targets(file: &TargetsFile) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for target in &file.targets {
        if target.username.is_empty() {
            return Err(ConfigError::Validation(
                "target username must be non-empty".to_string(),
            ));
        }

        if !is_valid_handle(&target.username) {
            return Err(ConfigError::Validation(format!(
                "target '{}' is not a valid handle (letters, digits, underscore; max 15)",
                target.username
            )));
        }

        if !seen.insert(target.username.to_ascii_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate target username: '{}'",
                target.username
            )));
        }
    }

    Ok(())
}

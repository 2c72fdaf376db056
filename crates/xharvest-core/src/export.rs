//! Rendering a job's saved posts as downloadable files.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::post::ExtractedPost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unknown export format \"{0}\"; expected json or csv")]
    UnknownFormat(String),

    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("export I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat row layout for the tabular export.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    external_id: &'a str,
    author_handle: &'a str,
    text: &'a str,
    published_at: Option<String>,
    replies: u64,
    reshares: u64,
    likes: u64,
    views: u64,
    has_image: bool,
    has_video: bool,
    is_reshare: bool,
    is_quote: bool,
    canonical_url: &'a str,
}

impl<'a> From<&'a ExtractedPost> for CsvRow<'a> {
    fn from(post: &'a ExtractedPost) -> Self {
        Self {
            external_id: &post.external_id,
            author_handle: &post.author_handle,
            text: &post.text,
            published_at: post.published_at.map(|t| t.to_rfc3339()),
            replies: post.metrics.replies,
            reshares: post.metrics.reshares,
            likes: post.metrics.likes,
            views: post.metrics.views,
            has_image: post.has_image,
            has_video: post.has_video,
            is_reshare: post.is_reshare,
            is_quote: post.is_quote,
            canonical_url: &post.canonical_url,
        }
    }
}

/// `tweets_job_<id>_<YYYYMMDD>.<ext>`
#[must_use]
pub fn default_export_filename(job_id: i64, date: NaiveDate, format: ExportFormat) -> String {
    format!(
        "tweets_job_{job_id}_{}.{}",
        date.format("%Y%m%d"),
        format.extension()
    )
}

/// Serializes posts in the requested format.
///
/// # Errors
///
/// Returns [`ExportError`] if serialization fails.
pub fn render_export(posts: &[ExtractedPost], format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(posts)?),
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for post in posts {
                writer.serialize(CsvRow::from(post))?;
            }
            if posts.is_empty() {
                writer.write_record(csv_header())?;
            }
            writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
        }
    }
}

fn csv_header() -> [&'static str; 13] {
    [
        "external_id",
        "author_handle",
        "text",
        "published_at",
        "replies",
        "reshares",
        "likes",
        "views",
        "has_image",
        "has_video",
        "is_reshare",
        "is_quote",
        "canonical_url",
    ]
}

/// Finds a previously written export in `dir` whose file name mentions any of
/// `handles` (case-insensitive) and carries the format's extension.
///
/// The most recently modified match wins. Returns `None` when the directory
/// is missing or nothing matches.
#[must_use]
pub fn find_fallback_export(dir: &Path, handles: &[String], format: ExportFormat) -> Option<PathBuf> {
    let needles: Vec<String> = handles
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect();
    if needles.is_empty() {
        return None;
    }

    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let ext_ok = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(format.extension()));
            let name = path.file_name()?.to_str()?.to_ascii_lowercase();
            if !ext_ok || !needles.iter().any(|n| name.contains(n.as_str())) {
                return None;
            }
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

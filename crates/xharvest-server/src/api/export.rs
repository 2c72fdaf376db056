//! `GET /jobs/{id}/export`: renders saved posts, or serves a previously
//! written export file when the posts cannot be produced.

use std::path::Path;

use axum::{
    extract::{Path as UrlPath, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension,
};
use serde::Deserialize;
use xharvest_core::{
    default_export_filename, find_fallback_export, render_export, ExportFormat, ExtractedPost,
    JobRun, JobStatus,
};
use xharvest_db::DbError;

use crate::middleware::RequestId;

use super::{job_not_found, map_db_error, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Debug)]
pub(super) struct ExportFile {
    filename: String,
    format: ExportFormat,
    bytes: Vec<u8>,
}

impl IntoResponse for ExportFile {
    fn into_response(self) -> Response {
        let disposition = HeaderValue::from_str(&format!(
            "attachment; filename=\"{}\"",
            self.filename
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

        (
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(self.format.content_type()),
                ),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            self.bytes,
        )
            .into_response()
    }
}

#[derive(Debug)]
pub(super) enum ExportFailure {
    Database(DbError),
    Render(String),
}

pub(super) async fn export_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    UrlPath(id): UrlPath<i64>,
    Query(query): Query<ExportQuery>,
) -> Result<ExportFile, ApiError> {
    let format = match query.format.as_deref() {
        Some(raw) => raw
            .parse::<ExportFormat>()
            .map_err(|e| ApiError::new(req_id.0.clone(), "validation_error", e.to_string()))?,
        None => ExportFormat::default(),
    };

    let job = xharvest_db::get_job(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| job_not_found(req_id.0.clone(), id))?;

    let posts = xharvest_db::list_all_posts(&state.pool, id).await;
    build_export(&job, posts, &state.export_dir, format)
        .await
        .map_err(|failure| match failure {
            ExportFailure::Database(e) => map_db_error(req_id.0, &e),
            ExportFailure::Render(message) => {
                tracing::error!(job_id = id, error = %message, "export rendering failed");
                ApiError::new(req_id.0, "internal_error", "failed to render export")
            }
        })
}

/// Chooses between on-demand rendering and a file from `export_dir`.
///
/// The file fallback applies when reading posts failed, or when a completed
/// job has no saved posts. A completed job without posts and without a
/// matching file still gets an empty export.
pub(super) async fn build_export(
    job: &JobRun,
    posts: Result<Vec<ExtractedPost>, DbError>,
    export_dir: &Path,
    format: ExportFormat,
) -> Result<ExportFile, ExportFailure> {
    let needs_fallback = match &posts {
        Err(e) => {
            tracing::warn!(job_id = job.id, error = %e, "reading posts for export failed");
            true
        }
        Ok(posts) => posts.is_empty() && job.status == JobStatus::Completed,
    };

    if needs_fallback {
        if let Some(file) = read_fallback(job, export_dir, format).await {
            return Ok(file);
        }
    }

    let posts = posts.map_err(ExportFailure::Database)?;
    let bytes = render_export(&posts, format).map_err(|e| ExportFailure::Render(e.to_string()))?;
    Ok(ExportFile {
        filename: default_export_filename(job.id, job.export_date(), format),
        format,
        bytes,
    })
}

async fn read_fallback(job: &JobRun, export_dir: &Path, format: ExportFormat) -> Option<ExportFile> {
    let dir = export_dir.to_path_buf();
    let handles = job.targets.clone();
    // Directory scan and metadata reads block.
    let found =
        tokio::task::spawn_blocking(move || find_fallback_export(&dir, &handles, format)).await;
    let path = match found {
        Ok(path) => path?,
        Err(e) => {
            tracing::warn!(job_id = job.id, error = %e, "fallback export search failed");
            return None;
        }
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            tracing::info!(job_id = job.id, path = %path.display(), "serving export from file");
            Some(ExportFile {
                filename: path
                    .file_name()
                    .map_or_else(
                        || default_export_filename(job.id, job.export_date(), format),
                        |n| n.to_string_lossy().into_owned(),
                    ),
                format,
                bytes,
            })
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "fallback export unreadable");
            None
        }
    }
}

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xharvest_db::HarvestedPostRow;

use crate::middleware::RequestId;

use super::{job_not_found, map_db_error, ApiError, ApiResponse, AppState};

const DEFAULT_PER_PAGE: i64 = 50;
const MAX_PER_PAGE: i64 = 500;

#[derive(Debug, Deserialize)]
pub(super) struct PostsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct PostPage {
    count: i64,
    page: i64,
    per_page: i64,
    results: Vec<PostItem>,
}

#[derive(Debug, Serialize)]
pub(super) struct PostItem {
    external_id: String,
    author_handle: String,
    text: String,
    published_at: Option<DateTime<Utc>>,
    replies: i64,
    reshares: i64,
    likes: i64,
    views: i64,
    has_image: bool,
    has_video: bool,
    is_reshare: bool,
    is_quote: bool,
    canonical_url: String,
}

impl From<HarvestedPostRow> for PostItem {
    fn from(row: HarvestedPostRow) -> Self {
        Self {
            external_id: row.external_id,
            author_handle: row.author_handle,
            text: row.text,
            published_at: row.published_at,
            replies: row.replies,
            reshares: row.reshares,
            likes: row.likes,
            views: row.views,
            has_image: row.has_image,
            has_video: row.has_video,
            is_reshare: row.is_reshare,
            is_quote: row.is_quote,
            canonical_url: row.canonical_url,
        }
    }
}

/// Returns `(page, per_page)` with defaults applied and bounds enforced.
fn normalize_page(query: &PostsQuery) -> (i64, i64) {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);
    (page, per_page)
}

pub(super) async fn list_job_posts(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Query(query): Query<PostsQuery>,
) -> Result<Json<ApiResponse<PostPage>>, ApiError> {
    xharvest_db::get_job(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| job_not_found(req_id.0.clone(), id))?;

    let (page, per_page) = normalize_page(&query);
    let offset = (page - 1).saturating_mul(per_page);

    let count = xharvest_db::count_posts(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let rows = xharvest_db::list_posts(&state.pool, id, per_page, offset)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        PostPage {
            count,
            page,
            per_page,
            results: rows.into_iter().map(PostItem::from).collect(),
        },
    ))
}

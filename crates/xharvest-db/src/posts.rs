//! Database operations for the `harvested_posts` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use xharvest_core::{ExtractedPost, JobStatus, PostMetrics};

use crate::jobs::transition_conflict;
use crate::DbError;

const POST_COLUMNS: &str = "id, job_id, external_id, author_handle, text, published_at, \
     replies, reshares, likes, views, has_image, has_video, is_reshare, is_quote, \
     canonical_url, created_at";

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HarvestedPostRow {
    pub id: i64,
    pub job_id: i64,
    pub external_id: String,
    pub author_handle: String,
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub replies: i64,
    pub reshares: i64,
    pub likes: i64,
    pub views: i64,
    pub has_image: bool,
    pub has_video: bool,
    pub is_reshare: bool,
    pub is_quote: bool,
    pub canonical_url: String,
    pub created_at: DateTime<Utc>,
}

impl HarvestedPostRow {
    #[must_use]
    pub fn into_post(self) -> ExtractedPost {
        let count = |v: i64| u64::try_from(v).unwrap_or(0);
        ExtractedPost {
            external_id: self.external_id,
            author_handle: self.author_handle,
            text: self.text,
            published_at: self.published_at,
            metrics: PostMetrics {
                replies: count(self.replies),
                reshares: count(self.reshares),
                likes: count(self.likes),
                views: count(self.views),
            },
            has_image: self.has_image,
            has_video: self.has_video,
            is_reshare: self.is_reshare,
            is_quote: self.is_quote,
            canonical_url: self.canonical_url,
        }
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Inserts posts for a job in one transaction, skipping any whose
/// `(job_id, external_id)` is already stored.
///
/// Returns the number of rows actually inserted.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobTransition`] if the job is not `running`,
/// so a terminal job's result set never changes. Returns [`DbError::Sqlx`]
/// if any insert fails; the batch is rolled back.
pub async fn insert_posts(
    pool: &PgPool,
    job_id: i64,
    posts: &[ExtractedPost],
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    // Holds the job row against a concurrent status change until commit.
    let running = sqlx::query_scalar::<_, bool>(
        "SELECT status = 'running' FROM harvest_jobs WHERE id = $1 FOR SHARE",
    )
    .bind(job_id)
    .fetch_optional(&mut *tx)
    .await?;
    if running != Some(true) {
        drop(tx);
        return Err(transition_conflict(pool, job_id, JobStatus::Running).await);
    }

    let mut inserted = 0u64;
    let clamp = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);

    for post in posts {
        let result = sqlx::query(
            "INSERT INTO harvested_posts (job_id, external_id, author_handle, text, published_at, \
                 replies, reshares, likes, views, has_image, has_video, is_reshare, is_quote, \
                 canonical_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (job_id, external_id) DO NOTHING",
        )
        .bind(job_id)
        .bind(&post.external_id)
        .bind(&post.author_handle)
        .bind(&post.text)
        .bind(post.published_at)
        .bind(clamp(post.metrics.replies))
        .bind(clamp(post.metrics.reshares))
        .bind(clamp(post.metrics.likes))
        .bind(clamp(post.metrics.views))
        .bind(post.has_image)
        .bind(post.has_video)
        .bind(post.is_reshare)
        .bind(post.is_quote)
        .bind(&post.canonical_url)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// One page of a job's posts in insertion order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_posts(
    pool: &PgPool,
    job_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<HarvestedPostRow>, DbError> {
    let rows = sqlx::query_as::<_, HarvestedPostRow>(&format!(
        "SELECT {POST_COLUMNS} FROM harvested_posts \
         WHERE job_id = $1 \
         ORDER BY id \
         LIMIT $2 OFFSET $3"
    ))
    .bind(job_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Every post of a job in insertion order, for export.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_all_posts(pool: &PgPool, job_id: i64) -> Result<Vec<ExtractedPost>, DbError> {
    let rows = sqlx::query_as::<_, HarvestedPostRow>(&format!(
        "SELECT {POST_COLUMNS} FROM harvested_posts WHERE job_id = $1 ORDER BY id"
    ))
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(HarvestedPostRow::into_post).collect())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_posts(pool: &PgPool, job_id: i64) -> Result<i64, DbError> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM harvested_posts WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(pool)
            .await?;

    Ok(count)
}

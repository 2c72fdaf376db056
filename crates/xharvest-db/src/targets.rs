//! Database operations for the `search_targets` table.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use xharvest_core::TargetConfig;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SearchTargetRow {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Returns every target, ordered by username.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_targets(pool: &PgPool) -> Result<Vec<SearchTargetRow>, DbError> {
    let rows = sqlx::query_as::<_, SearchTargetRow>(
        "SELECT id, username, display_name, is_active, created_at, updated_at \
         FROM search_targets \
         ORDER BY LOWER(username)",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns the id of the target with `username` (case-insensitive),
/// creating it if it does not exist yet.
///
/// Takes a connection so it can run inside the caller's transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_or_create_target(conn: &mut PgConnection, username: &str) -> Result<i64, DbError> {
    // The no-op update makes RETURNING yield the existing row on conflict.
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO search_targets (username) \
         VALUES ($1) \
         ON CONFLICT ((LOWER(username))) DO UPDATE \
         SET updated_at = search_targets.updated_at \
         RETURNING id",
    )
    .bind(username)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Upsert targets from the seed file.
///
/// Returns the number of targets processed. All upserts run in one
/// transaction; if any fails the batch is rolled back.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any database operation fails.
pub async fn seed_targets(pool: &PgPool, targets: &[TargetConfig]) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;

    for target in targets {
        sqlx::query(
            "INSERT INTO search_targets (username, display_name, is_active) \
             VALUES ($1, $2, true) \
             ON CONFLICT ((LOWER(username))) DO UPDATE SET \
                 display_name = COALESCE(EXCLUDED.display_name, search_targets.display_name), \
                 is_active = true, \
                 updated_at = NOW()",
        )
        .bind(&target.username)
        .bind(&target.display_name)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(targets.len())
}

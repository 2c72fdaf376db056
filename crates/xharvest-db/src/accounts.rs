//! Database operations for the `x_accounts` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use xharvest_core::{AccountCredentials, SessionSnapshot};

use crate::DbError;

const ACCOUNT_COLUMNS: &str = "id, username, password, email, is_active, session_state, \
     last_login_at, created_at, updated_at";

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

#[derive(Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub username: String,
    pub password: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub session_state: Option<serde_json::Value>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRow {
    /// True when the stored state parses to a non-empty snapshot.
    #[must_use]
    pub fn has_saved_session(&self) -> bool {
        matches!(
            SessionSnapshot::from_stored(self.session_state.clone()),
            Ok(Some(_))
        )
    }

    #[must_use]
    pub fn credentials(&self) -> AccountCredentials {
        AccountCredentials {
            id: self.id,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

impl std::fmt::Debug for AccountRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRow")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("email", &self.email)
            .field("is_active", &self.is_active)
            .field("session_state", &self.session_state.as_ref().map(|_| "[redacted]"))
            .field("last_login_at", &self.last_login_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_accounts(pool: &PgPool) -> Result<Vec<AccountRow>, DbError> {
    let rows = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM x_accounts ORDER BY username"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns an account by id, or `None` if not found.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_account(pool: &PgPool, id: i64) -> Result<Option<AccountRow>, DbError> {
    let row = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM x_accounts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts an account or updates the credentials of an existing one with
/// the same username. Saved session state is left untouched.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn upsert_account(
    pool: &PgPool,
    username: &str,
    password: Option<&str>,
    email: Option<&str>,
) -> Result<AccountRow, DbError> {
    let row = sqlx::query_as::<_, AccountRow>(&format!(
        "INSERT INTO x_accounts (username, password, email, is_active) \
         VALUES ($1, $2, $3, true) \
         ON CONFLICT (username) DO UPDATE SET \
             password = COALESCE(EXCLUDED.password, x_accounts.password), \
             email = COALESCE(EXCLUDED.email, x_accounts.email), \
             is_active = true, \
             updated_at = NOW() \
         RETURNING {ACCOUNT_COLUMNS}"
    ))
    .bind(username)
    .bind(password)
    .bind(email)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Loads the saved session for an account.
///
/// Unreadable state is logged and treated as absent so the next run logs in
/// again instead of failing.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the account does not exist, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn load_session_state(
    pool: &PgPool,
    account_id: i64,
) -> Result<Option<SessionSnapshot>, DbError> {
    let stored = sqlx::query_scalar::<_, Option<serde_json::Value>>(
        "SELECT session_state FROM x_accounts WHERE id = $1",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound {
        entity: "account",
        id: account_id,
    })?;

    match SessionSnapshot::from_stored(stored) {
        Ok(snapshot) => Ok(snapshot),
        Err(e) => {
            tracing::warn!(account_id, error = %e, "ignoring unreadable saved session state");
            Ok(None)
        }
    }
}

/// # Errors
///
/// Returns [`DbError::NotFound`] if the account does not exist,
/// [`DbError::SessionState`] if the snapshot cannot be encoded, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn save_session_state(
    pool: &PgPool,
    account_id: i64,
    snapshot: &SessionSnapshot,
    login_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let value = serde_json::to_value(snapshot)?;
    let result = sqlx::query(
        "UPDATE x_accounts \
         SET session_state = $2, last_login_at = $3, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(account_id)
    .bind(value)
    .bind(login_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound {
            entity: "account",
            id: account_id,
        });
    }
    Ok(())
}

/// # Errors
///
/// Returns [`DbError::NotFound`] if the account does not exist, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn clear_session_state(pool: &PgPool, account_id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE x_accounts SET session_state = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(account_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound {
            entity: "account",
            id: account_id,
        });
    }
    Ok(())
}

use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use xharvest_db::{AccountRow, SearchTargetRow};

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState};

/// Account as exposed over the API: credentials and session state stay private.
#[derive(Debug, Serialize)]
pub(super) struct AccountItem {
    id: i64,
    username: String,
    email: Option<String>,
    is_active: bool,
    has_saved_session: bool,
    last_login_at: Option<DateTime<Utc>>,
}

impl From<AccountRow> for AccountItem {
    fn from(row: AccountRow) -> Self {
        Self {
            has_saved_session: row.has_saved_session(),
            id: row.id,
            username: row.username,
            email: row.email,
            is_active: row.is_active,
            last_login_at: row.last_login_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct TargetItem {
    id: i64,
    username: String,
    display_name: Option<String>,
    is_active: bool,
}

impl From<SearchTargetRow> for TargetItem {
    fn from(row: SearchTargetRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            is_active: row.is_active,
        }
    }
}

pub(super) async fn list_accounts(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<AccountItem>>>, ApiError> {
    let rows = xharvest_db::list_accounts(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        rows.into_iter().map(AccountItem::from).collect(),
    ))
}

pub(super) async fn list_targets(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<TargetItem>>>, ApiError> {
    let rows = xharvest_db::list_targets(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        rows.into_iter().map(TargetItem::from).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_item_never_serializes_secrets() {
        let row = AccountRow {
            id: 3,
            username: "harvester".to_string(),
            password: Some("hunter2".to_string()),
            email: Some("ops@example.com".to_string()),
            is_active: true,
            session_state: Some(serde_json::json!({
                "cookies": [{"name": "auth_token", "value": "tok", "domain": ".x.com"}]
            })),
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&AccountItem::from(row)).unwrap();
        assert!(json.contains("\"has_saved_session\":true"));
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("auth_token"));
    }
}

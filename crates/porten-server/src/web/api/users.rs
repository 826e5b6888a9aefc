use crate::state::AppState;
use crate::web::api::middleware::{ensure_owner_or_admin, AdminUser, AuthUser};
use crate::web::error::ApiError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use porten_common::models::page::{Page, DEFAULT_PAGE_SIZE};
use porten_common::models::user::{UserDetail, UserSummary};
use porten_db::{Fields, Session};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_size")]
    pub size: usize,
}

fn default_page() -> usize {
    1
}

fn default_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn parse_user_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest("Invalid user ID".to_string()))
}

/// GET /api/users - List users (admin only)
#[tracing::instrument(skip(state, _admin))]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Page<UserSummary>>, ApiError> {
    let mut session = Session::new(state.pool.clone());
    let users = state.users.list(&mut session).await?;
    let page = Page::paginate(users, query.page, query.size).map(|u| UserSummary::from(&u));
    Ok(Json(page))
}

/// GET /api/users/{id}
#[tracing::instrument(skip(state, _user))]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<UserDetail>, ApiError> {
    let user_id = parse_user_id(&id)?;
    let mut session = Session::new(state.pool.clone());
    let user = state.users.get(&mut session, user_id).await?;
    Ok(Json(UserDetail::from(&user)))
}

/// PATCH /api/users/{id} - Partial update
#[tracing::instrument(skip(state, current, data))]
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    AuthUser(current): AuthUser,
    Path(id): Path<String>,
    Json(data): Json<Fields>,
) -> Result<StatusCode, ApiError> {
    let user_id = parse_user_id(&id)?;
    ensure_owner_or_admin(&current, user_id)?;

    let mut session = Session::new(state.pool.clone());
    let user = state.users.get(&mut session, user_id).await?;
    state.users.update(&mut session, user, data, true).await?;
    tracing::info!("User {} updated by {}", user_id, current.user_id);
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/users/{id}
///
/// Restricted to the account owner or an admin, the same rule as PATCH.
#[tracing::instrument(skip(state, current))]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    AuthUser(current): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id = parse_user_id(&id)?;
    ensure_owner_or_admin(&current, user_id)?;

    let mut session = Session::new(state.pool.clone());
    let user = state.users.get(&mut session, user_id).await?;
    state.users.delete(&mut session, user, true).await?;
    tracing::info!("User {} deleted by {}", user_id, current.user_id);
    Ok(StatusCode::NO_CONTENT)
}

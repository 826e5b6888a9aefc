use crate::state::AppState;
use crate::web::error::ApiError;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use porten_db::{UserRepo, UserRow};
use std::sync::Arc;
use uuid::Uuid;

const BEARER_SCHEME: &str = "bearer";

/// Split an `Authorization` header value into scheme and credentials and
/// return the credentials if the scheme is Bearer (any case).
pub fn bearer_credential(header_value: Option<&str>) -> Result<&str, ApiError> {
    let value = header_value.ok_or_else(|| ApiError::unauthenticated("Not authenticated"))?;
    let (scheme, credentials) = value.split_once(' ').unwrap_or((value, ""));
    let credentials = credentials.trim();
    if scheme.is_empty() || credentials.is_empty() {
        return Err(ApiError::unauthenticated("Not authenticated"));
    }
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return Err(ApiError::unauthenticated(
            "Invalid authentication credentials",
        ));
    }
    Ok(credentials)
}

/// Extractor that validates the Bearer token and loads the user it names.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserRow);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = bearer_credential(header_value)?;

        let pool = state.pool.clone();
        let user = state
            .tokens
            .resolve(token, |email| async move {
                UserRepo::get_by_email(&pool, &email).await
            })
            .await?;
        Ok(AuthUser(user))
    }
}

/// Extractor for endpoints restricted to administrators.
#[derive(Debug, Clone)]
pub struct AdminUser(pub UserRow);

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        require_admin(user).map(AdminUser)
    }
}

pub fn require_admin(user: UserRow) -> Result<UserRow, ApiError> {
    if user.is_admin {
        Ok(user)
    } else {
        Err(ApiError::PermissionDenied)
    }
}

/// Users may modify their own record; admins may modify any.
pub fn ensure_owner_or_admin(user: &UserRow, target: Uuid) -> Result<(), ApiError> {
    if user.is_admin || user.user_id == target {
        Ok(())
    } else {
        Err(ApiError::PermissionDenied)
    }
}

use crate::auth::service;
use crate::state::AppState;
use crate::web::api::middleware::AuthUser;
use crate::web::error::ApiError;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use porten_common::models::auth::{LoginRequest, RegisterRequest, TokenResponse};
use porten_common::models::user::UserDetail;
use porten_db::Session;
use std::sync::Arc;

/// POST /api/auth/register
#[tracing::instrument(skip(state, req))]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = Session::new(state.pool.clone());
    let user = service::register(&mut session, &state.users, &req.email, &req.password).await?;
    tracing::info!("Registered user {}", user.user_id);
    Ok((StatusCode::CREATED, Json(UserDetail::from(&user))))
}

/// POST /api/auth/login
#[tracing::instrument(skip(state, req))]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let access = service::login(
        &state.pool,
        &state.passwords,
        &state.tokens,
        &req.email,
        &req.password,
        Utc::now(),
    )
    .await?;
    Ok(Json(TokenResponse { access }))
}

/// GET /api/auth/me
#[tracing::instrument(skip(user))]
pub async fn me(AuthUser(user): AuthUser) -> Json<UserDetail> {
    Json(UserDetail::from(&user))
}

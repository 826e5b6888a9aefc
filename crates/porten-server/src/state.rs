use crate::auth::password::PasswordContext;
use crate::auth::token::TokenService;
use crate::config::ServerConfig;
use crate::users::{user_service, UserService};
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<ServerConfig>,
    pub passwords: PasswordContext,
    pub tokens: Arc<TokenService>,
    pub users: Arc<UserService>,
}

impl AppState {
    /// Fails if the auth settings cannot produce a token service.
    pub fn new(pool: PgPool, config: ServerConfig) -> Result<Self> {
        let tokens = TokenService::new(&config.auth)?;
        let passwords = PasswordContext::new(config.auth.password_hashing_scheme);
        Ok(Self {
            pool,
            config: Arc::new(config),
            passwords,
            tokens: Arc::new(tokens),
            users: Arc::new(user_service(passwords)),
        })
    }
}

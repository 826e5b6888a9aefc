//! Account operations built on the user CRUD service: login, registration
//! and admin provisioning.

use crate::auth::password::PasswordContext;
use crate::auth::token::TokenService;
use crate::users::UserService;
use chrono::{DateTime, Utc};
use porten_db::{CrudError, Fields, Session, UserRepo, UserRow};
use serde_json::Value;
use sqlx::PgPool;

pub const MIN_ADMIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User with this email already registered")]
    EmailTaken,
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    #[error(transparent)]
    Crud(CrudError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<CrudError> for AccountError {
    fn from(err: CrudError) -> Self {
        match err {
            CrudError::Duplicate { .. } => AccountError::EmailTaken,
            other => AccountError::Crud(other),
        }
    }
}

/// Exchange credentials for an access token.
///
/// An unknown email and a wrong password fail the same way.
pub async fn login(
    pool: &PgPool,
    passwords: &PasswordContext,
    tokens: &TokenService,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<String, AccountError> {
    let user = UserRepo::get_by_email(pool, email).await?;
    match user {
        Some(user) if passwords.check_password(&user, password) => {
            Ok(tokens.issue(&user, now)?)
        }
        _ => {
            tracing::debug!("Rejected login for {}", email);
            Err(AccountError::InvalidCredentials)
        }
    }
}

/// Create a regular user and commit it.
pub async fn register(
    session: &mut Session,
    users: &UserService,
    email: &str,
    password: &str,
) -> Result<UserRow, AccountError> {
    ensure_email_free(session, email).await?;

    let mut data = Fields::new();
    data.insert("email".to_string(), Value::String(email.to_string()));
    data.insert("password".to_string(), Value::String(password.to_string()));
    Ok(users.create(session, data, true).await?)
}

/// Create an administrator and commit it.
pub async fn create_admin(
    session: &mut Session,
    users: &UserService,
    email: &str,
    password: &str,
) -> Result<UserRow, AccountError> {
    if password.chars().count() < MIN_ADMIN_PASSWORD_LEN {
        return Err(AccountError::PasswordTooShort);
    }
    ensure_email_free(session, email).await?;

    let mut data = Fields::new();
    data.insert("email".to_string(), Value::String(email.to_string()));
    data.insert("password".to_string(), Value::String(password.to_string()));
    data.insert("is_admin".to_string(), Value::Bool(true));
    Ok(users.create(session, data, true).await?)
}

/// Create the configured admin on startup unless the email is already taken.
pub async fn seed_admin(
    session: &mut Session,
    users: &UserService,
    email: &str,
    password: &str,
) -> Result<Option<UserRow>, AccountError> {
    match create_admin(session, users, email, password).await {
        Ok(user) => Ok(Some(user)),
        Err(AccountError::EmailTaken) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn ensure_email_free(session: &mut Session, email: &str) -> Result<(), AccountError> {
    let conn = session.conn().await.map_err(CrudError::from)?;
    if UserRepo::exists_by_email(conn, email).await? {
        return Err(AccountError::EmailTaken);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_maps_to_email_taken() {
        let err = AccountError::from(CrudError::Duplicate { entity: "User" });
        assert!(matches!(err, AccountError::EmailTaken));
        assert_eq!(err.to_string(), "User with this email already registered");
    }

    #[test]
    fn test_other_crud_errors_are_kept() {
        let err = AccountError::from(CrudError::NotFound { entity: "User" });
        assert!(matches!(err, AccountError::Crud(CrudError::NotFound { .. })));
    }

    #[test]
    fn test_password_too_short_message() {
        assert_eq!(
            AccountError::PasswordTooShort.to_string(),
            "Password must be at least 6 characters"
        );
    }
}

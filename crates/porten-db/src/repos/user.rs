use crate::crud::{CrudError, Entity, Fields};
use crate::session::PgEntity;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use porten_common::models::user::{UserDetail, UserSummary};
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgExecutor, Postgres};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub password_hash: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for UserRow {
    const NAME: &'static str = "User";
    /// `password` carries an already hashed value; the server's user hooks
    /// replace plaintext before it gets here.
    const FIELDS: &'static [&'static str] = &["email", "full_name", "password", "is_admin"];

    fn id(&self) -> Uuid {
        self.user_id
    }

    fn from_fields(id: Uuid, data: Fields) -> Result<Self, CrudError> {
        let email = match data.get("email") {
            Some(Value::String(email)) => email.clone(),
            Some(_) => return Err(CrudError::invalid("email", "string")),
            None => return Err(CrudError::MissingField("email")),
        };
        let mut user = UserRow {
            user_id: id,
            email,
            full_name: None,
            password_hash: None,
            is_admin: false,
            created_at: Utc::now(),
        };
        for (field, value) in data {
            if field != "email" {
                user.set_field(&field, value)?;
            }
        }
        Ok(user)
    }

    fn set_field(&mut self, field: &str, value: Value) -> Result<(), CrudError> {
        match field {
            "email" => match value {
                Value::String(email) => self.email = email,
                _ => return Err(CrudError::invalid(field, "string")),
            },
            "full_name" => self.full_name = optional_string(field, value)?,
            "password" => self.password_hash = optional_string(field, value)?,
            "is_admin" => match value {
                Value::Bool(is_admin) => self.is_admin = is_admin,
                _ => return Err(CrudError::invalid(field, "boolean")),
            },
            _ => return Err(CrudError::invalid(field, "a declared user field")),
        }
        Ok(())
    }
}

fn optional_string(field: &str, value: Value) -> Result<Option<String>, CrudError> {
    match value {
        Value::String(s) => Ok(Some(s)),
        Value::Null => Ok(None),
        _ => Err(CrudError::invalid(field, "string or null")),
    }
}

impl PgEntity for UserRow {
    const TABLE: &'static str = "users";
    const ID_COLUMN: &'static str = "user_id";
    const COLUMNS: &'static [&'static str] =
        &["email", "full_name", "password_hash", "is_admin", "created_at"];

    fn bind_columns<'q>(
        &'q self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        query
            .bind(&self.email)
            .bind(&self.full_name)
            .bind(&self.password_hash)
            .bind(self.is_admin)
            .bind(self.created_at)
    }
}

impl From<&UserRow> for UserSummary {
    fn from(user: &UserRow) -> Self {
        UserSummary {
            id: user.user_id,
            email: user.email.clone(),
        }
    }
}

impl From<&UserRow> for UserDetail {
    fn from(user: &UserRow) -> Self {
        UserDetail {
            id: user.user_id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            is_admin: user.is_admin,
        }
    }
}

/// Lookups by email, which the generic CRUD service does not cover.
pub struct UserRepo;

impl UserRepo {
    pub async fn get_by_email<'e>(
        executor: impl PgExecutor<'e>,
        email: &str,
    ) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, email, full_name, password_hash, is_admin, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(executor)
        .await
        .context("Failed to get user by email")?;
        Ok(row)
    }

    pub async fn exists_by_email<'e>(executor: impl PgExecutor<'e>, email: &str) -> Result<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(executor)
                .await
                .context("Failed to check user email")?;
        Ok(exists)
    }
}

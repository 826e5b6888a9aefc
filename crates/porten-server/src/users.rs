use crate::auth::password::PasswordContext;
use porten_db::{CrudError, CrudHooks, CrudService, Fields, UserRow};
use serde_json::Value;

/// Keys a new user may be created with
pub const USER_CREATE_FIELDS: &[&str] = &["email", "full_name", "password", "is_admin"];

/// Keys an existing user may change
pub const USER_UPDATE_FIELDS: &[&str] = &["full_name", "password"];

pub type UserService = CrudService<UserRow, UserHooks>;

/// Replaces a plaintext `password` in the payload with its hash before the
/// row is written. A `null` password is passed through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct UserHooks {
    passwords: PasswordContext,
}

impl UserHooks {
    pub fn new(passwords: PasswordContext) -> Self {
        Self { passwords }
    }

    fn hash_password_field(&self, mut data: Fields) -> Result<Fields, CrudError> {
        match data.get_mut("password") {
            Some(Value::String(plain)) => {
                let hashed = self.passwords.hash(plain)?;
                *plain = hashed;
            }
            Some(Value::Null) | None => {}
            Some(_) => return Err(CrudError::invalid("password", "a string")),
        }
        Ok(data)
    }
}

impl CrudHooks<UserRow> for UserHooks {
    fn before_create(&self, data: Fields) -> Result<Fields, CrudError> {
        self.hash_password_field(data)
    }

    fn before_update(&self, _instance: &UserRow, data: Fields) -> Result<Fields, CrudError> {
        self.hash_password_field(data)
    }
}

pub fn user_service(passwords: PasswordContext) -> UserService {
    CrudService::with_hooks(UserHooks::new(passwords))
        .create_fields(USER_CREATE_FIELDS)
        .update_fields(USER_UPDATE_FIELDS)
}

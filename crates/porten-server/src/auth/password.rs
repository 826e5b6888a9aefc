use anyhow::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use porten_db::UserRow;
use serde::{Deserialize, Serialize};

/// Password hashing scheme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashScheme {
    /// argon2id, PHC string format
    #[default]
    Argon2,
    /// bcrypt (`$2b$...`)
    Bcrypt,
}

/// Hashes and verifies passwords with one configured scheme.
#[derive(Debug, Clone, Copy)]
pub struct PasswordContext {
    scheme: HashScheme,
}

impl PasswordContext {
    pub fn new(scheme: HashScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> HashScheme {
        self.scheme
    }

    /// Hash a password with a fresh salt
    pub fn hash(&self, password: &str) -> Result<String> {
        match self.scheme {
            HashScheme::Argon2 => {
                let salt = SaltString::generate(&mut OsRng);
                let hash = Argon2::default()
                    .hash_password(password.as_bytes(), &salt)
                    .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
                Ok(hash.to_string())
            }
            HashScheme::Bcrypt => bcrypt::hash(password, bcrypt::DEFAULT_COST)
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e)),
        }
    }

    /// Verify a password against a stored hash.
    ///
    /// A malformed hash, or one produced by another scheme, is a mismatch.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match self.scheme {
            HashScheme::Argon2 => match PasswordHash::new(hash) {
                Ok(parsed) => Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok(),
                Err(_) => false,
            },
            HashScheme::Bcrypt => bcrypt::verify(password, hash).unwrap_or(false),
        }
    }

    /// Replace the user's password hash in memory. Persisting is up to the caller.
    pub fn set_password(&self, user: &mut UserRow, password: &str) -> Result<()> {
        user.password_hash = Some(self.hash(password)?);
        Ok(())
    }

    /// A user without a password hash never matches.
    pub fn check_password(&self, user: &UserRow, password: &str) -> bool {
        user.password_hash
            .as_deref()
            .is_some_and(|hash| self.verify(password, hash))
    }
}

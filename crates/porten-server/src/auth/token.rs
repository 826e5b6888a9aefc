//! Signed, expiring access tokens.
//!
//! Resolution is a fixed pipeline: decode and check the signature, check
//! `exp`, check the claim shape, then look the subject up. Every failure maps
//! to the same [`TokenError::Invalid`] so a caller cannot tell which step
//! rejected the token.

use crate::config::AuthConfig;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use porten_db::UserRow;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::future::Future;

pub type Claims = Map<String, Value>;

pub const TOKEN_TYPE_CLAIM: &str = "token_type";
pub const EXP_CLAIM: &str = "exp";
pub const EMAIL_CLAIM: &str = "email";

pub const INVALID_TOKEN_MESSAGE: &str = "Token is invalid or expired";

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token is invalid or expired")]
    Invalid,
    /// The subject lookup itself failed (e.g. database unavailable)
    #[error("Failed to resolve token subject: {0:#}")]
    Lookup(anyhow::Error),
}

/// Something a token can be issued for.
pub trait TokenSubject {
    /// Value of the `email` claim
    fn email(&self) -> &str;

    /// Extra claims carried alongside the standard ones
    fn extra_claims(&self) -> Claims {
        Claims::new()
    }
}

impl TokenSubject for UserRow {
    fn email(&self) -> &str {
        &self.email
    }

    fn extra_claims(&self) -> Claims {
        let mut claims = Claims::new();
        claims.insert("user_id".to_string(), Value::String(self.user_id.to_string()));
        claims
    }
}

pub struct TokenService {
    token_type: String,
    lifetime: Duration,
    algorithm: Algorithm,
    required_claims: Vec<String>,
    leeway_secs: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenService {
    /// Only HMAC algorithms are accepted; the signing key is a shared secret.
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if !matches!(
            config.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            bail!(
                "Unsupported token algorithm {:?}: only HS256, HS384 and HS512 are supported",
                config.algorithm
            );
        }
        if config.access_token_expire_minutes <= 0 {
            bail!("access_token_expire_minutes must be positive");
        }
        let Some(lifetime) = Duration::try_minutes(config.access_token_expire_minutes) else {
            bail!("access_token_expire_minutes is out of range");
        };
        let leeway_secs =
            i64::try_from(config.leeway_secs).context("leeway_secs is out of range")?;

        Ok(Self {
            token_type: config.token_type.clone(),
            lifetime,
            algorithm: config.algorithm,
            required_claims: config.required_claims.clone(),
            leeway_secs,
            encoding_key: EncodingKey::from_secret(config.secret_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret_key.as_bytes()),
        })
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Fails if `now + lifetime` is past the representable date range.
    pub fn claims_for<S: TokenSubject>(&self, subject: &S, now: DateTime<Utc>) -> Result<Claims> {
        let exp = now
            .checked_add_signed(self.lifetime)
            .context("Token expiry is out of range")?;
        let mut claims = subject.extra_claims();
        claims.insert(
            TOKEN_TYPE_CLAIM.to_string(),
            Value::String(self.token_type.clone()),
        );
        claims.insert(
            EXP_CLAIM.to_string(),
            Value::from(exp.timestamp()),
        );
        claims.insert(
            EMAIL_CLAIM.to_string(),
            Value::String(subject.email().to_string()),
        );
        Ok(claims)
    }

    /// Issue a token for `subject`, valid until `now + lifetime`.
    pub fn issue<S: TokenSubject>(&self, subject: &S, now: DateTime<Utc>) -> Result<String> {
        self.encode(&self.claims_for(subject, now)?)
    }

    pub fn encode(&self, claims: &Claims) -> Result<String> {
        jsonwebtoken::encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .context("Failed to create access token")
    }

    /// Verify signature, expiry and claim shape, returning the claims.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let claims = self.decode(token, now)?;
        self.verify_claims(&claims)?;
        Ok(claims)
    }

    /// Validate `token` and resolve it to a user via `lookup`.
    pub async fn resolve<U, F, Fut>(&self, token: &str, lookup: F) -> Result<U, TokenError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<U>>>,
    {
        self.resolve_at(token, Utc::now(), lookup).await
    }

    pub async fn resolve_at<U, F, Fut>(
        &self,
        token: &str,
        now: DateTime<Utc>,
        lookup: F,
    ) -> Result<U, TokenError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<U>>>,
    {
        let claims = self.verify_at(token, now)?;
        let email = match claims.get(EMAIL_CLAIM).and_then(Value::as_str) {
            Some(email) => email.to_string(),
            None => {
                tracing::debug!("Token subject claim is not a string");
                return Err(TokenError::Invalid);
            }
        };
        match lookup(email).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => {
                tracing::debug!("Token subject does not exist");
                Err(TokenError::Invalid)
            }
            Err(e) => Err(TokenError::Lookup(e)),
        }
    }

    fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        // exp is checked below against `now` so it can be tested deterministically;
        // jsonwebtoken only enforces that the claim is present.
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from([EXP_CLAIM.to_string()]);

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!("Token decode failed: {}", e);
                TokenError::Invalid
            })?
            .claims;

        let exp = claims
            .get(EXP_CLAIM)
            .and_then(Value::as_i64)
            .ok_or(TokenError::Invalid)?;
        if now.timestamp() >= exp.saturating_add(self.leeway_secs) {
            tracing::debug!("Token expired at {}", exp);
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }

    fn verify_claims(&self, claims: &Claims) -> Result<(), TokenError> {
        match claims.get(TOKEN_TYPE_CLAIM).and_then(Value::as_str) {
            Some(token_type) if token_type == self.token_type => {}
            _ => {
                tracing::debug!("Token type claim missing or mismatched");
                return Err(TokenError::Invalid);
            }
        }
        if let Some(missing) = self
            .required_claims
            .iter()
            .find(|claim| !claims.contains_key(claim.as_str()))
        {
            tracing::debug!("Token is missing required claim '{}'", missing);
            return Err(TokenError::Invalid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::HashScheme;
    use serde_json::json;
    use uuid::Uuid;

    const SECRET: &str = "test-jwt-secret";

    fn config() -> AuthConfig {
        AuthConfig {
            secret_key: SECRET.to_string(),
            access_token_expire_minutes: 15,
            algorithm: Algorithm::HS256,
            password_hashing_scheme: HashScheme::Argon2,
            token_type: "access".to_string(),
            required_claims: vec!["email".to_string()],
            leeway_secs: 0,
            initial_admin: None,
        }
    }

    fn service() -> TokenService {
        TokenService::new(&config()).unwrap()
    }

    fn user(email: &str) -> UserRow {
        UserRow {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            full_name: None,
            password_hash: None,
            is_admin: false,
            created_at: Utc::now(),
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    async fn resolve_against(
        tokens: &TokenService,
        token: &str,
        now: DateTime<Utc>,
        users: &[UserRow],
    ) -> Result<UserRow, TokenError> {
        let users = users.to_vec();
        tokens
            .resolve_at(token, now, |email| async move {
                Ok(users.into_iter().find(|u| u.email == email))
            })
            .await
    }

    /// Sign arbitrary claims with the test secret.
    fn sign(claims: Value) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_claims_shape() {
        let tokens = service();
        let alice = user("alice@test.com");
        let claims = tokens.claims_for(&alice, t0()).unwrap();
        assert_eq!(claims["token_type"], json!("access"));
        assert_eq!(claims["email"], json!("alice@test.com"));
        assert_eq!(claims["exp"], json!(t0().timestamp() + 15 * 60));
        assert_eq!(claims["user_id"], json!(alice.user_id.to_string()));
    }

    #[tokio::test]
    async fn test_issue_and_resolve() {
        let tokens = service();
        let alice = user("alice@test.com");
        let token = tokens.issue(&alice, t0()).unwrap();

        let resolved = resolve_against(&tokens, &token, t0(), &[alice.clone()])
            .await
            .unwrap();
        assert_eq!(resolved, alice);
    }

    #[tokio::test]
    async fn test_valid_until_just_before_expiry() {
        let tokens = service();
        let alice = user("alice@test.com");
        let token = tokens.issue(&alice, t0()).unwrap();
        let almost = t0() + tokens.lifetime() - Duration::seconds(1);

        assert!(resolve_against(&tokens, &token, almost, &[alice])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_expired_at_and_after_lifetime() {
        let tokens = service();
        let alice = user("alice@test.com");
        let token = tokens.issue(&alice, t0()).unwrap();

        for now in [t0() + tokens.lifetime(), t0() + Duration::days(1)] {
            let err = resolve_against(&tokens, &token, now, &[alice.clone()])
                .await
                .unwrap_err();
            assert!(matches!(err, TokenError::Invalid));
        }
    }

    #[tokio::test]
    async fn test_leeway_extends_expiry() {
        let mut cfg = config();
        cfg.leeway_secs = 30;
        let tokens = TokenService::new(&cfg).unwrap();
        let alice = user("alice@test.com");
        let token = tokens.issue(&alice, t0()).unwrap();

        let within = t0() + tokens.lifetime() + Duration::seconds(10);
        assert!(resolve_against(&tokens, &token, within, &[alice])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_flipped_signature_fails() {
        let tokens = service();
        let alice = user("alice@test.com");
        let token = tokens.issue(&alice, t0()).unwrap();

        let (head, signature) = token.rsplit_once('.').unwrap();
        let mut sig: Vec<char> = signature.chars().collect();
        let idx = sig.len() / 2;
        sig[idx] = if sig[idx] == 'A' { 'B' } else { 'A' };
        let tampered = format!("{}.{}", head, sig.into_iter().collect::<String>());

        let err = resolve_against(&tokens, &tampered, t0(), &[alice])
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[tokio::test]
    async fn test_wrong_secret_fails() {
        let tokens = service();
        let mut other_cfg = config();
        other_cfg.secret_key = "another-secret".to_string();
        let other = TokenService::new(&other_cfg).unwrap();
        let alice = user("alice@test.com");
        let token = other.issue(&alice, t0()).unwrap();

        assert!(resolve_against(&tokens, &token, t0(), &[alice])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_email_claim_fails() {
        let tokens = service();
        let alice = user("alice@test.com");
        let token = sign(json!({
            "token_type": "access",
            "exp": t0().timestamp() + 600,
        }));

        let err = resolve_against(&tokens, &token, t0(), &[alice])
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[tokio::test]
    async fn test_missing_exp_claim_fails() {
        let tokens = service();
        let alice = user("alice@test.com");
        let token = sign(json!({
            "token_type": "access",
            "email": "alice@test.com",
        }));

        assert!(resolve_against(&tokens, &token, t0(), &[alice])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_token_type_mismatch_fails() {
        let tokens = service();
        let alice = user("alice@test.com");
        for claims in [
            json!({"token_type": "refresh", "exp": t0().timestamp() + 600, "email": "alice@test.com"}),
            json!({"exp": t0().timestamp() + 600, "email": "alice@test.com"}),
        ] {
            let token = sign(claims);
            let err = resolve_against(&tokens, &token, t0(), &[alice.clone()])
                .await
                .unwrap_err();
            assert!(matches!(err, TokenError::Invalid));
        }
    }

    #[tokio::test]
    async fn test_extra_required_claim_enforced() {
        let mut cfg = config();
        cfg.required_claims = vec!["email".to_string(), "scope".to_string()];
        let tokens = TokenService::new(&cfg).unwrap();
        let alice = user("alice@test.com");
        let token = tokens.issue(&alice, t0()).unwrap();

        assert!(resolve_against(&tokens, &token, t0(), &[alice])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_subject_fails() {
        let tokens = service();
        let alice = user("alice@test.com");
        let token = tokens.issue(&alice, t0()).unwrap();

        let err = resolve_against(&tokens, &token, t0(), &[user("bob@test.com")])
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_invalid_token() {
        let tokens = service();
        let alice = user("alice@test.com");
        let token = tokens.issue(&alice, t0()).unwrap();

        let err = tokens
            .resolve_at(token.as_str(), t0(), |_email| async {
                Err::<Option<UserRow>, _>(anyhow::anyhow!("database unavailable"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_garbage_token_fails() {
        let tokens = service();
        for token in ["", "not-a-token", "a.b.c"] {
            assert!(matches!(
                resolve_against(&tokens, token, t0(), &[]).await,
                Err(TokenError::Invalid)
            ));
        }
    }

    #[test]
    fn test_all_failures_share_one_message() {
        assert_eq!(TokenError::Invalid.to_string(), INVALID_TOKEN_MESSAGE);
    }

    #[test]
    fn test_rejects_non_hmac_algorithm() {
        let mut cfg = config();
        cfg.algorithm = Algorithm::RS256;
        assert!(TokenService::new(&cfg).is_err());
    }

    #[test]
    fn test_rejects_non_positive_lifetime() {
        let mut cfg = config();
        cfg.access_token_expire_minutes = 0;
        assert!(TokenService::new(&cfg).is_err());
    }

    #[test]
    fn test_rejects_lifetime_beyond_duration_range() {
        let mut cfg = config();
        cfg.access_token_expire_minutes = i64::MAX;
        assert!(TokenService::new(&cfg).is_err());
    }

    #[test]
    fn test_issue_fails_when_expiry_overflows_dates() {
        let mut cfg = config();
        cfg.access_token_expire_minutes = 1_000_000_000_000;
        let tokens = TokenService::new(&cfg).unwrap();
        let alice = user("alice@test.com");
        assert!(tokens.claims_for(&alice, t0()).is_err());
        assert!(tokens.issue(&alice, t0()).is_err());
    }
}

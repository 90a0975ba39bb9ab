//! Supabase session token authentication and cron trigger authorization.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Audience Supabase puts on tokens of signed-in users.
pub const SUPABASE_AUDIENCE: &str = "authenticated";

/// Decoded Supabase access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseClaims {
    /// User ID
    pub sub: String,
    /// Email (if available)
    #[serde(default)]
    pub email: Option<String>,
    /// Postgres role the session maps to
    #[serde(default)]
    pub role: Option<String>,
    pub aud: String,
    pub exp: i64,
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
}

impl From<SupabaseClaims> for AuthUser {
    fn from(claims: SupabaseClaims) -> Self {
        Self {
            uid: claims.sub,
            email: claims.email,
        }
    }
}

/// Verifies HS256 session tokens against the project JWT secret.
pub struct JwtVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl JwtVerifier {
    /// An empty secret makes every verification fail.
    pub fn new(secret: &str) -> Self {
        let key = (!secret.is_empty()).then(|| DecodingKey::from_secret(secret.as_bytes()));
        if key.is_none() {
            warn!("SUPABASE_JWT_SECRET not set, all authenticated requests will be rejected");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SUPABASE_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);

        Self { key, validation }
    }

    pub fn verify_token(&self, token: &str) -> Result<SupabaseClaims, ApiError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| ApiError::unauthorized("Authentication is not configured"))?;

        let data = decode::<SupabaseClaims>(token, key, &self.validation).map_err(|e| {
            debug!("Token validation failed: {}", e);
            ApiError::unauthorized(format!("Token validation failed: {}", e))
        })?;

        Ok(data.claims)
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let auth_header = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let claims = state.jwt.verify_token(token)?;
        Ok(AuthUser::from(claims))
    }
}

/// Marker extractor for requests carrying the cron bearer secret.
#[derive(Debug, Clone, Copy)]
pub struct CronAuth;

#[axum::async_trait]
impl FromRequestParts<AppState> for CronAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state
            .config
            .cron_secret
            .as_deref()
            .ok_or_else(|| ApiError::unauthorized("Cron triggers are disabled"))?;

        let token = bearer_token(&parts.headers)?;
        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            warn!("Rejected cron trigger with wrong secret");
            return Err(ApiError::unauthorized("Invalid cron secret"));
        }

        Ok(CronAuth)
    }
}

/// Byte comparison whose running time does not depend on where the inputs
/// first differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "super-secret-jwt-token-with-at-least-32-characters";

    fn token(aud: &str, exp_offset: i64, secret: &str) -> String {
        let claims = SupabaseClaims {
            sub: "user-1".into(),
            email: Some("a@example.com".into()),
            role: Some("authenticated".into()),
            aud: aud.into(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token() {
        let verifier = JwtVerifier::new(SECRET);
        let claims = verifier.verify_token(&token("authenticated", 3600, SECRET)).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(AuthUser::from(claims).email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_rejects_expired_wrong_audience_and_wrong_key() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(verifier.verify_token(&token("authenticated", -3600, SECRET)).is_err());
        assert!(verifier.verify_token(&token("anon", 3600, SECRET)).is_err());
        assert!(verifier
            .verify_token(&token("authenticated", 3600, "another-secret-of-sufficient-length!!"))
            .is_err());
    }

    #[test]
    fn test_empty_secret_rejects_everything() {
        let verifier = JwtVerifier::new("");
        assert!(verifier.verify_token(&token("authenticated", 3600, "")).is_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert("Authorization", "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_err());

        headers.insert("Authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
    }
}

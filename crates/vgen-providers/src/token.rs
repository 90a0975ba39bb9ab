//! Signed API token cache for the direct Kling API.
//!
//! Tokens are HS256 JWTs issued by us from the access/secret key pair:
//! - `iss` = access key
//! - `exp` = now + 30 minutes
//! - `nbf` = now - 5 seconds (tolerates clock skew at the provider)
//!
//! A signed token is reused until shortly before it expires.

use std::time::{Duration, Instant};

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Token lifetime.
pub const TOKEN_TTL_SECS: i64 = 30 * 60;

/// Backdate applied to `nbf`.
pub const TOKEN_NOT_BEFORE_SKEW_SECS: i64 = 5;

/// Refresh margin: sign a new token 60 seconds before expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Claims carried by a provider API token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiTokenClaims {
    pub iss: String,
    pub exp: i64,
    pub nbf: i64,
}

/// Sign a fresh token valid from `now - 5s` to `now + 30min`.
pub fn sign_token(access_key: &str, secret_key: &str, now_secs: i64) -> ProviderResult<String> {
    let claims = ApiTokenClaims {
        iss: access_key.to_string(),
        exp: now_secs + TOKEN_TTL_SECS,
        nbf: now_secs - TOKEN_NOT_BEFORE_SKEW_SECS,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret_key.as_bytes()),
    )
    .map_err(|e| ProviderError::Auth(e.to_string()))
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

/// Thread-safe cache of the current signed token.
pub struct ApiTokenCache {
    access_key: String,
    secret_key: String,
    cache: RwLock<Option<CachedToken>>,
}

impl ApiTokenCache {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            cache: RwLock::new(None),
        }
    }

    /// Drop the cached token so the next call signs a new one.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Get a valid token, signing a new one if necessary.
    pub async fn get_token(&self) -> ProviderResult<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid() {
                return Ok(cached.token.clone());
            }
        }

        let token = sign_token(&self.access_key, &self.secret_key, Utc::now().timestamp())?;
        debug!("Signed new provider API token");

        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(TOKEN_TTL_SECS as u64),
        });

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[test]
    fn test_signed_token_claims() {
        let now = 1_700_000_000;
        let token = sign_token("ak", "sk", now).unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        let data = decode::<ApiTokenClaims>(&token, &DecodingKey::from_secret(b"sk"), &validation)
            .unwrap();

        assert_eq!(data.header.alg, Algorithm::HS256);
        assert_eq!(data.claims.iss, "ak");
        assert_eq!(data.claims.exp, now + 1800);
        assert_eq!(data.claims.nbf, now - 5);
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let token = sign_token("ak", "sk", Utc::now().timestamp()).unwrap();
        let validation = Validation::new(Algorithm::HS256);
        assert!(
            decode::<ApiTokenClaims>(&token, &DecodingKey::from_secret(b"other"), &validation)
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_cache_reuses_token() {
        let cache = ApiTokenCache::new("ak", "sk");
        let first = cache.get_token().await.unwrap();
        let second = cache.get_token().await.unwrap();
        assert_eq!(first, second);
    }
}

//! Authentication back-end contract: an external collaborator the session
//! layer calls into to turn a login token into a player TSID, and to mint
//! tokens for that player (refreshed periodically while connected).
//!
//! Real token cryptography is out of scope for the core; this crate defines
//! the trait plus one HMAC-signed JWT implementation, good enough to drive
//! the login state machine end-to-end in tests and small deployments.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use gs_tsid::Tsid;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token is malformed or has an invalid signature")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("token has expired")]
    Expired,
    #[error("token subject {0:?} is not a valid player tsid")]
    BadSubject(String),
}

/// `init(config)`, `authenticate(token) -> playerTsid`, `getToken(player)`,
/// `getTokenLifespan()`.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Tsid, AuthError>;
    async fn get_token(&self, player: Tsid) -> Result<String, AuthError>;
    fn get_token_lifespan(&self) -> std::time::Duration;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

/// HMAC-signed opaque tokens (spec.md §6 "authentication token cryptography"
/// is an external collaborator; this is the one concrete implementation that
/// satisfies the contract without a real identity provider behind it).
pub struct HmacAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifespan: std::time::Duration,
}

impl HmacAuth {
    pub fn new(secret: &[u8], lifespan: std::time::Duration) -> Self {
        HmacAuth {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            lifespan,
        }
    }

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
    }
}

#[async_trait]
impl AuthBackend for HmacAuth {
    async fn authenticate(&self, token: &str) -> Result<Tsid, AuthError> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(err),
            }
        })?;
        Tsid::parse(&data.claims.sub).map_err(|_| AuthError::BadSubject(data.claims.sub))
    }

    async fn get_token(&self, player: Tsid) -> Result<String, AuthError> {
        let now = Self::now();
        let claims = Claims {
            sub: player.as_str().to_string(),
            iat: now,
            exp: now + self.lifespan.as_secs(),
        };
        encode(&Header::new(jsonwebtoken::Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::InvalidToken)
    }

    fn get_token_lifespan(&self) -> std::time::Duration {
        self.lifespan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HmacAuth {
        HmacAuth::new(b"test-secret", std::time::Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn round_trips_a_minted_token() {
        let auth = backend();
        let player = Tsid::parse("Pabcdefghijklmn").unwrap();
        let token = auth.get_token(player).await.unwrap();
        let got = auth.authenticate(&token).await.unwrap();
        assert_eq!(got, player);
    }

    #[tokio::test]
    async fn rejects_tampered_token() {
        let auth = backend();
        let player = Tsid::parse("Pabcdefghijklmn").unwrap();
        let mut token = auth.get_token(player).await.unwrap();
        token.push('x');
        assert!(auth.authenticate(&token).await.is_err());
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let auth = HmacAuth::new(b"test-secret", std::time::Duration::from_secs(0));
        let player = Tsid::parse("Pabcdefghijklmn").unwrap();
        let token = auth.get_token(player).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(matches!(auth.authenticate(&token).await, Err(AuthError::Expired)));
    }
}

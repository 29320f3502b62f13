//! Session tokens: short-lived HS256 JWTs carrying the user's game level.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Clock skew tolerated when validating `exp`.
const LEEWAY_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
#[error("session token error: {0}")]
pub struct TokenError(#[from] jsonwebtoken::errors::Error);

/// Claims embedded in a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the upstream user ID.
    pub sub: String,
    /// Access level granted by the authorized tier (the tier title).
    pub game_level: String,
    /// Issued-at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
}

/// Issues and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct SessionTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionTokens {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Mint a token for `subject_id` valid for the configured TTL.
    pub fn issue(&self, subject_id: &str, game_level: &str) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: subject_id.to_string(),
            game_level: game_level.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    fn sign(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> SessionTokens {
        SessionTokens::new("test-session-secret", Duration::from_secs(60))
    }

    #[test]
    fn issued_token_verifies_with_claims() {
        let tokens = tokens();
        let token = tokens.issue("user-1", "Gold").unwrap();
        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.game_level, "Gold");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = SessionTokens::new("other-secret", Duration::from_secs(60))
            .issue("user-1", "Gold")
            .unwrap();
        assert!(tokens().verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = tokens();
        let now = Utc::now().timestamp();
        let token = tokens
            .sign(&SessionClaims {
                sub: "user-1".into(),
                game_level: "Gold".into(),
                iat: now - 600,
                exp: now - 300,
            })
            .unwrap();
        assert!(tokens.verify(&token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(tokens().verify("not-a-jwt").is_err());
    }
}

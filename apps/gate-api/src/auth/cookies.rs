//! Signed cookies carried across the OAuth redirect.

use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use sha2::{Digest, Sha512};
use time::Duration;

/// Holds `nonce:platform` for the pending authorization request.
pub const STATE_COOKIE: &str = "oauth_state";

/// Holds the ephemeral key of the realtime connection waiting for the result.
pub const LINK_COOKIE: &str = "oauth_link";

const STATE_COOKIE_MINUTES: i64 = 5;

/// Client platform that started the login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Mobile,
    Desktop,
}

impl Platform {
    /// Anything other than an explicit `mobile` is treated as desktop.
    pub fn from_query(raw: Option<&str>) -> Self {
        match raw {
            Some("mobile") => Platform::Mobile,
            _ => Platform::Desktop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Mobile => "mobile",
            Platform::Desktop => "desktop",
        }
    }
}

/// CSRF nonce bound to the platform that requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub nonce: String,
    pub platform: Platform,
}

impl OAuthState {
    /// Fresh state with a 16-byte (32 hex char) nonce.
    pub fn generate(platform: Platform) -> Self {
        Self {
            nonce: gate_common::random_hex(16),
            platform,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.nonce, self.platform.as_str())
    }

    /// Parse a `nonce:platform` cookie value. Anything else is rejected.
    pub fn decode(raw: &str) -> Option<Self> {
        let (nonce, platform) = raw.split_once(':')?;
        if nonce.is_empty() {
            return None;
        }
        let platform = match platform {
            "mobile" => Platform::Mobile,
            "desktop" => Platform::Desktop,
            _ => return None,
        };
        Some(Self {
            nonce: nonce.to_string(),
            platform,
        })
    }
}

/// Derive the 64-byte signing key from the configured secret.
pub fn cookie_key(secret: &str) -> Key {
    Key::from(Sha512::digest(secret.as_bytes()).as_slice())
}

/// Short-lived cookie for the encoded [`OAuthState`].
pub fn state_cookie(value: String, secure: bool) -> Cookie<'static> {
    short_lived(STATE_COOKIE, value, secure)
}

/// Short-lived cookie linking the browser flow to a waiting connection.
pub fn link_cookie(temp_id: String, secure: bool) -> Cookie<'static> {
    short_lived(LINK_COOKIE, temp_id, secure)
}

/// Cookie used to clear `name` (path must match the one it was set with).
pub fn removal(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}

fn short_lived(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::minutes(STATE_COOKIE_MINUTES))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_cookie_value() {
        let state = OAuthState::generate(Platform::Mobile);
        assert_eq!(state.nonce.len(), 32);
        let encoded = state.encode();
        assert!(encoded.ends_with(":mobile"));
        assert_eq!(OAuthState::decode(&encoded), Some(state));
    }

    #[test]
    fn decode_rejects_malformed_values() {
        assert_eq!(OAuthState::decode("no-separator"), None);
        assert_eq!(OAuthState::decode(":mobile"), None);
        assert_eq!(OAuthState::decode("abc:tablet"), None);
    }

    #[test]
    fn platform_defaults_to_desktop() {
        assert_eq!(Platform::from_query(Some("mobile")), Platform::Mobile);
        assert_eq!(Platform::from_query(Some("MOBILE")), Platform::Desktop);
        assert_eq!(Platform::from_query(None), Platform::Desktop);
    }

    #[test]
    fn state_cookie_is_http_only_with_five_minute_lifetime() {
        let cookie = state_cookie("abc:desktop".to_string(), true);
        assert_eq!(cookie.name(), STATE_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::minutes(5)));
    }
}

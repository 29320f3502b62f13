use std::time::Duration;

use chrono::{DateTime, Utc};

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// OAuth client ID issued by Patreon.
    pub client_id: String,
    /// OAuth client secret issued by Patreon.
    pub client_secret: String,
    /// Redirect URI registered with Patreon (points at `/auth/provider/callback`).
    pub redirect_uri: String,
    /// Campaign whose members are checked during revalidation.
    pub campaign_id: String,
    /// Tier IDs that grant access, in configuration order.
    pub allowed_tier_ids: Vec<String>,
    /// Creator (service-level) access token used by the revalidation sweep.
    pub creator_access_token: String,
    /// Creator refresh token.
    pub creator_refresh_token: String,
    /// When the creator access token expires. `None` forces a refresh on first use.
    pub creator_token_expires_at: Option<DateTime<Utc>>,
    /// HMAC secret for session tokens.
    pub session_token_secret: String,
    /// Session token lifetime.
    pub session_token_ttl: Duration,
    /// Secret the signed cookie key is derived from.
    pub cookie_secret: String,
    /// Whether cookies carry the `Secure` attribute.
    pub cookie_secure: bool,
    /// How often authenticated connections are re-validated.
    pub revalidation_interval: Duration,
    /// Upper bound on every upstream call.
    pub upstream_timeout: Duration,
    /// Port the HTTP server binds to.
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing or
    /// a numeric variable is malformed or zero.
    pub fn from_env() -> Self {
        let production = std::env::var("APP_ENV").map(|v| v == "production").unwrap_or(false);

        let allowed_tier_ids =
            parse_tier_ids(&std::env::var("PATREON_REQUIRED_TIER_IDS").unwrap_or_default());
        if allowed_tier_ids.is_empty() {
            tracing::warn!("PATREON_REQUIRED_TIER_IDS is empty; no tier will be authorized");
        }

        let creator_token_expires_at = std::env::var("PATREON_CREATOR_TOKEN_EXPIRES_AT")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .unwrap_or_else(|_| {
                        panic!("PATREON_CREATOR_TOKEN_EXPIRES_AT must be RFC 3339, got {v}")
                    })
                    .with_timezone(&Utc)
            });

        Self {
            client_id: required_var("PATREON_CLIENT_ID"),
            client_secret: required_var("PATREON_CLIENT_SECRET"),
            redirect_uri: required_var("PATREON_REDIRECT_URI"),
            campaign_id: required_var("PATREON_CAMPAIGN_ID"),
            allowed_tier_ids,
            creator_access_token: required_var("PATREON_CREATOR_ACCESS_TOKEN"),
            creator_refresh_token: required_var("PATREON_CREATOR_REFRESH_TOKEN"),
            creator_token_expires_at,
            session_token_secret: required_var("SESSION_TOKEN_SECRET"),
            session_token_ttl: positive_secs_var("SESSION_TOKEN_TTL_SECS", 60),
            cookie_secret: required_var("COOKIE_SECRET"),
            cookie_secure: std::env::var("COOKIE_SECURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(production),
            revalidation_interval: positive_secs_var("REVALIDATION_INTERVAL_SECS", 15 * 60),
            upstream_timeout: positive_secs_var("UPSTREAM_TIMEOUT_SECS", 10),
            port: parsed_var("PORT", 3000),
        }
    }
}

/// Split a comma-separated tier list, dropping blanks and surrounding whitespace.
pub fn parse_tier_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid number, got {raw:?}")),
        Err(_) => default,
    }
}

fn positive_secs_var(name: &str, default: u64) -> Duration {
    parse_positive_secs(name, std::env::var(name).ok().as_deref(), default)
}

/// Parse a whole number of seconds. Unset means `default`; malformed or zero panics.
fn parse_positive_secs(name: &str, raw: Option<&str>, default: u64) -> Duration {
    let secs = match raw {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .unwrap_or_else(|_| panic!("{name} must be a whole number of seconds, got {raw:?}")),
        None => default,
    };
    if secs == 0 {
        panic!("{name} must be greater than zero");
    }
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tier_ids_splits_and_trims() {
        assert_eq!(parse_tier_ids("999,111"), vec!["999", "111"]);
        assert_eq!(parse_tier_ids(" 999 , ,111,"), vec!["999", "111"]);
    }

    #[test]
    fn parse_tier_ids_empty() {
        assert!(parse_tier_ids("").is_empty());
        assert!(parse_tier_ids(" , ").is_empty());
    }

    #[test]
    fn positive_secs_default_and_override() {
        assert_eq!(
            parse_positive_secs("REVALIDATION_INTERVAL_SECS", None, 900),
            Duration::from_secs(900)
        );
        assert_eq!(
            parse_positive_secs("REVALIDATION_INTERVAL_SECS", Some(" 30 "), 900),
            Duration::from_secs(30)
        );
    }

    #[test]
    #[should_panic(expected = "REVALIDATION_INTERVAL_SECS must be greater than zero")]
    fn zero_revalidation_interval_is_rejected() {
        parse_positive_secs("REVALIDATION_INTERVAL_SECS", Some("0"), 900);
    }

    #[test]
    #[should_panic(expected = "UPSTREAM_TIMEOUT_SECS must be greater than zero")]
    fn zero_upstream_timeout_is_rejected() {
        parse_positive_secs("UPSTREAM_TIMEOUT_SECS", Some("0"), 10);
    }

    #[test]
    #[should_panic(expected = "UPSTREAM_TIMEOUT_SECS must be a whole number of seconds")]
    fn malformed_seconds_are_rejected() {
        parse_positive_secs("UPSTREAM_TIMEOUT_SECS", Some("ten"), 10);
    }
}

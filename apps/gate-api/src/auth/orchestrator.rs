//! OAuth request/callback exchange that turns a membership into a session token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tracing::{debug, info, warn};

use crate::auth::cookies::{OAuthState, Platform};
use crate::auth::identity::{self, FlatIdentity, Tier};
use crate::auth::tokens::SessionTokens;
use crate::config::Config;
use crate::error::{AuthError, Denial, InfraFailure};
use crate::provider::patreon::{AUTHORIZE_URL, LOGIN_SCOPES};
use crate::provider::{with_timeout, MembershipProvider, ProviderError};

/// Static inputs of the login flow.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_url: Url,
    pub allowed_tier_ids: Vec<String>,
    pub upstream_timeout: Duration,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            authorize_url: Url::parse(AUTHORIZE_URL).expect("authorize URL constant is valid"),
            allowed_tier_ids: config.allowed_tier_ids.clone(),
            upstream_timeout: config.upstream_timeout,
        }
    }
}

/// Output of [`Authenticator::begin_redirect`].
#[derive(Debug, Clone)]
pub struct RedirectIssued {
    /// Value to store in the state cookie.
    pub state: OAuthState,
    pub authorize_url: String,
}

/// A completed, authorized callback.
#[derive(Debug, Clone)]
pub struct AuthSuccess {
    pub session_token: String,
    pub identity: FlatIdentity,
    pub tier: Tier,
    pub platform: Platform,
}

pub struct Authenticator {
    provider: Arc<dyn MembershipProvider>,
    tokens: SessionTokens,
    settings: AuthSettings,
}

impl Authenticator {
    pub fn new(
        provider: Arc<dyn MembershipProvider>,
        tokens: SessionTokens,
        settings: AuthSettings,
    ) -> Self {
        Self {
            provider,
            tokens,
            settings,
        }
    }

    /// Mint a CSRF nonce for `platform` and build the upstream authorization URL.
    pub fn begin_redirect(&self, platform: Platform) -> RedirectIssued {
        let state = OAuthState::generate(platform);

        let mut url = self.settings.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", LOGIN_SCOPES)
            .append_pair("state", &state.nonce);

        debug!(platform = platform.as_str(), "issued authorization redirect");

        RedirectIssued {
            state,
            authorize_url: url.into(),
        }
    }

    /// Validate the callback, resolve the user's membership, and issue a session token.
    ///
    /// `state_from_cookie` is the verified cookie value, `None` when the cookie
    /// was absent or its signature did not check out.
    pub async fn complete_callback(
        &self,
        code: Option<&str>,
        state_from_url: Option<&str>,
        state_from_cookie: Option<&str>,
    ) -> Result<AuthSuccess, AuthError> {
        let state = state_from_cookie
            .and_then(OAuthState::decode)
            .filter(|state| state_from_url == Some(state.nonce.as_str()))
            .ok_or(Denial::CsrfMismatch)?;

        let code = code.filter(|c| !c.is_empty()).ok_or(Denial::MissingCode)?;

        let limit = self.settings.upstream_timeout;

        let credential = with_timeout(limit, self.provider.exchange_code(code))
            .await
            .map_err(InfraFailure::UpstreamExchange)?;

        let document = with_timeout(limit, self.provider.fetch_identity(&credential))
            .await
            .map_err(InfraFailure::UpstreamIdentity)?;

        let identity = FlatIdentity::from_document(&document).map_err(|err| {
            warn!(error = %err, "identity document could not be parsed");
            InfraFailure::UpstreamIdentity(ProviderError::Decode(err.to_string()))
        })?;

        let tier = identity::authorize(&identity, &self.settings.allowed_tier_ids)?.clone();

        let session_token = self
            .tokens
            .issue(&identity.user_id, &tier.title)
            .map_err(InfraFailure::from)?;

        info!(
            user_id = %identity.user_id,
            tier_id = %tier.id,
            platform = state.platform.as_str(),
            "session token issued"
        );

        Ok(AuthSuccess {
            session_token,
            identity,
            tier,
            platform: state.platform,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::{identity_document, MemoryProvider};

    fn authenticator(provider: Arc<MemoryProvider>) -> Authenticator {
        Authenticator::new(
            provider,
            SessionTokens::new("secret", Duration::from_secs(60)),
            AuthSettings {
                client_id: "client-1".into(),
                redirect_uri: "http://localhost:3000/auth/provider/callback".into(),
                authorize_url: Url::parse(AUTHORIZE_URL).unwrap(),
                allowed_tier_ids: vec!["999".into(), "111".into()],
                upstream_timeout: Duration::from_secs(1),
            },
        )
    }

    #[test]
    fn redirect_url_carries_oauth_parameters() {
        let auth = authenticator(Arc::new(MemoryProvider::new()));
        let issued = auth.begin_redirect(Platform::Mobile);

        let url = Url::parse(&issued.authorize_url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["scope"], LOGIN_SCOPES);
        assert_eq!(params["state"], issued.state.nonce);
        assert_eq!(issued.state.platform, Platform::Mobile);
    }

    #[tokio::test]
    async fn mismatched_state_is_rejected_before_any_upstream_call() {
        let provider = Arc::new(MemoryProvider::new());
        let auth = authenticator(provider.clone());

        let err = auth
            .complete_callback(Some("code"), Some("nonce-a"), Some("nonce-b:desktop"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Denied(Denial::CsrfMismatch)));

        let err = auth.complete_callback(Some("code"), Some("nonce-a"), None).await.unwrap_err();
        assert!(matches!(err, AuthError::Denied(Denial::CsrfMismatch)));

        assert_eq!(provider.calls().exchange, 0);
    }

    #[tokio::test]
    async fn missing_code_is_denied() {
        let auth = authenticator(Arc::new(MemoryProvider::new()));
        let err = auth
            .complete_callback(Some(""), Some("n"), Some("n:desktop"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Denied(Denial::MissingCode)));
    }

    #[tokio::test]
    async fn failed_exchange_is_infrastructure_failure() {
        let auth = authenticator(Arc::new(MemoryProvider::new()));
        let err = auth
            .complete_callback(Some("unknown"), Some("n"), Some("n:desktop"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Infra(InfraFailure::UpstreamExchange(_))));
    }

    #[tokio::test]
    async fn failed_identity_fetch_is_infrastructure_failure() {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_code("code", identity_document("u1", "Ada", "a@x", &[]));
        provider.fail_identity();
        let auth = authenticator(provider);

        let err = auth
            .complete_callback(Some("code"), Some("n"), Some("n:desktop"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Infra(InfraFailure::UpstreamIdentity(_))));
    }

    #[tokio::test]
    async fn active_patron_with_allowed_tier_gets_token() {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_code(
            "code",
            identity_document("u1", "Ada", "a@x", &[(Some("active_patron"), &[("999", "Gold")])]),
        );
        let auth = authenticator(provider);

        let success = auth
            .complete_callback(Some("code"), Some("n"), Some("n:mobile"))
            .await
            .unwrap();
        assert_eq!(success.tier.title, "Gold");
        assert_eq!(success.platform, Platform::Mobile);

        let claims = SessionTokens::new("secret", Duration::from_secs(60))
            .verify(&success.session_token)
            .unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.game_level, "Gold");
    }

    #[tokio::test]
    async fn former_patron_gets_no_token() {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_code(
            "code",
            identity_document("u1", "Ada", "a@x", &[(Some("former_patron"), &[("999", "Gold")])]),
        );
        let auth = authenticator(provider);

        let err = auth
            .complete_callback(Some("code"), Some("n"), Some("n:desktop"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Denied(Denial::NotActivePatron)));
    }
}

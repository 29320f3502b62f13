pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod routes;
pub mod tasks;

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use auth::orchestrator::{AuthSettings, Authenticator};
use auth::tokens::SessionTokens;
use config::Config;
use gateway::registry::ConnectionRegistry;
use provider::MembershipProvider;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub auth: Arc<Authenticator>,
    pub tokens: SessionTokens,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: Config, provider: Arc<dyn MembershipProvider>) -> Self {
        let tokens = SessionTokens::new(&config.session_token_secret, config.session_token_ttl);
        let auth = Authenticator::new(provider, tokens.clone(), AuthSettings::from_config(&config));
        let cookie_key = auth::cookies::cookie_key(&config.cookie_secret);

        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            auth: Arc::new(auth),
            tokens,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

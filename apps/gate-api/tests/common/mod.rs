#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_extra::extract::cookie::{Cookie, Key, SignedCookieJar};
use http::header::COOKIE;
use http::{HeaderMap, HeaderValue};

use gate_api::config::Config;
use gate_api::provider::memory::MemoryProvider;
use gate_api::AppState;

pub const SESSION_SECRET: &str = "test-session-secret";

/// Configuration for tests. Never reads the environment.
pub fn test_config() -> Config {
    Config {
        client_id: "test-client".to_string(),
        client_secret: "test-client-secret".to_string(),
        redirect_uri: "http://localhost:3000/auth/provider/callback".to_string(),
        campaign_id: "campaign-1".to_string(),
        allowed_tier_ids: gate_api::config::parse_tier_ids("999,111"),
        creator_access_token: "creator-access".to_string(),
        creator_refresh_token: "creator-refresh".to_string(),
        creator_token_expires_at: None,
        session_token_secret: SESSION_SECRET.to_string(),
        session_token_ttl: Duration::from_secs(60),
        cookie_secret: "test-cookie-secret".to_string(),
        cookie_secure: false,
        revalidation_interval: Duration::from_secs(900),
        upstream_timeout: Duration::from_secs(2),
        port: 0,
    }
}

/// Build a test AppState around a scripted in-memory provider.
pub fn test_state() -> (AppState, Arc<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    let state = AppState::new(test_config(), provider.clone());
    (state, provider)
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState, Arc<MemoryProvider>) {
    let (state, provider) = test_state();
    let app = gate_api::routes::router().with_state(state.clone());
    (app, state, provider)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the background.
pub async fn start_server() -> (SocketAddr, AppState, Arc<MemoryProvider>) {
    let (app, state, provider) = test_app();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, provider)
}

/// Verify a signed cookie the way the server does and return its plain value.
pub fn unsign(key: &Key, cookie: &Cookie<'_>) -> Option<String> {
    let mut headers = HeaderMap::new();
    let raw = format!("{}={}", cookie.name(), cookie.value());
    headers.insert(COOKIE, HeaderValue::from_str(&raw).ok()?);
    SignedCookieJar::from_headers(&headers, key.clone())
        .get(cookie.name())
        .map(|c| c.value().to_string())
}

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gate_api::config::Config;
use gate_api::provider::credential::CredentialManager;
use gate_api::provider::patreon::PatreonClient;
use gate_api::provider::{Credential, MembershipProvider};
use gate_api::tasks::revalidation::Revalidator;
use gate_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let provider: Arc<dyn MembershipProvider> =
        Arc::new(PatreonClient::new(&config).expect("failed to build Patreon HTTP client"));

    // Shared creator credential; without a known expiry it is refreshed on first use.
    let credentials = Arc::new(CredentialManager::new(
        provider.clone(),
        Credential {
            access_token: config.creator_access_token.clone(),
            refresh_token: Some(config.creator_refresh_token.clone()),
            expires_at: config.creator_token_expires_at.unwrap_or_else(Utc::now),
        },
        config.upstream_timeout,
    ));

    tracing::info!(
        campaign_id = %config.campaign_id,
        allowed_tiers = config.allowed_tier_ids.len(),
        revalidation_secs = config.revalidation_interval.as_secs(),
        "gate-api configured"
    );

    let revalidation_interval = config.revalidation_interval;
    let upstream_timeout = config.upstream_timeout;
    let state = AppState::new(config, provider.clone());

    let sweeper = Arc::new(Revalidator::new(
        state.registry.clone(),
        provider,
        credentials,
        upstream_timeout,
    ))
    .start(revalidation_interval);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(gate_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "gate-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    sweeper.stop().await;
    tracing::info!("gate-api stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

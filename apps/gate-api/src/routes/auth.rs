//! Auth routes: OAuth redirect and callback.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::SignedCookieJar;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::cookies::{self, Platform, LINK_COOKIE, STATE_COOKIE};
use crate::error::AuthError;
use crate::gateway::events::MIN_TEMP_ID_LEN;
use crate::gateway::push::{push_auth_data, AuthPush};
use crate::routes::pages;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/provider/redirect", get(redirect))
        .route("/auth/provider/callback", get(callback))
}

// ---------------------------------------------------------------------------
// GET /auth/provider/redirect
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RedirectParams {
    /// `mobile` or `desktop` (default).
    pub platform: Option<String>,
    /// Ephemeral key of the realtime connection waiting for the result.
    pub temp_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/auth/provider/redirect",
    tag = "Auth",
    params(RedirectParams),
    responses((status = 302, description = "Redirect to the provider's authorization page")),
)]
pub async fn redirect(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<RedirectParams>,
) -> impl IntoResponse {
    let platform = Platform::from_query(params.platform.as_deref());
    let issued = state.auth.begin_redirect(platform);
    let secure = state.config.cookie_secure;

    let jar = jar.add(cookies::state_cookie(issued.state.encode(), secure));
    let jar = match params.temp_id {
        Some(temp_id) if temp_id.chars().count() >= MIN_TEMP_ID_LEN => {
            jar.add(cookies::link_cookie(temp_id, secure))
        }
        _ => jar.remove(cookies::removal(LINK_COOKIE)),
    };

    (StatusCode::FOUND, jar, [(header::LOCATION, issued.authorize_url)])
}

// ---------------------------------------------------------------------------
// GET /auth/provider/callback
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[utoipa::path(
    get,
    path = "/auth/provider/callback",
    tag = "Auth",
    params(CallbackParams),
    responses(
        (
            status = 200,
            description = "Signed in; token shown or delivered to the waiting app",
            content_type = "text/html"
        ),
        (status = 403, description = "Login refused", content_type = "text/html"),
        (status = 502, description = "Membership service unreachable", content_type = "text/html"),
    ),
)]
pub async fn callback(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, SignedCookieJar, Html<String>) {
    let state_cookie = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let link = jar.get(LINK_COOKIE).map(|c| c.value().to_string());
    let jar = jar
        .remove(cookies::removal(STATE_COOKIE))
        .remove(cookies::removal(LINK_COOKIE));

    let result = state
        .auth
        .complete_callback(
            params.code.as_deref(),
            params.state.as_deref(),
            state_cookie.as_deref(),
        )
        .await;

    let success = match result {
        Ok(success) => success,
        Err(err) => {
            match &err {
                AuthError::Denied(denial) => tracing::warn!(reason = ?denial, "login denied"),
                AuthError::Infra(failure) => tracing::error!(error = %failure, "login failed"),
            }
            return (err.status(), jar, pages::error(&err.user_message()));
        }
    };

    if let Some(temp_id) = link {
        let delivered = push_auth_data(
            &state.registry,
            &temp_id,
            AuthPush {
                session_token: success.session_token.clone(),
                user_id: success.identity.user_id.clone(),
                email: success.identity.email.clone(),
                game_level: success.tier.title.clone(),
            },
        );
        if delivered {
            return (StatusCode::OK, jar, pages::linked(&success.identity.full_name));
        }
    }

    (
        StatusCode::OK,
        jar,
        pages::success(&success.session_token, &success.identity.full_name),
    )
}

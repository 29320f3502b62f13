use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::tokens::TokenError;
use crate::provider::ProviderError;

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Authentication outcomes
// ---------------------------------------------------------------------------

/// An expected, user-facing refusal. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("The login request could not be verified. Please start the sign-in again.")]
    CsrfMismatch,
    #[error("The provider did not return an authorization code.")]
    MissingCode,
    #[error("An active membership is required.")]
    NotActivePatron,
    #[error("Your membership tier does not include access.")]
    TierNotAllowed,
}

/// An operational failure talking to the provider or signing the token.
#[derive(Debug, thiserror::Error)]
pub enum InfraFailure {
    #[error("authorization code exchange failed: {0}")]
    UpstreamExchange(#[source] ProviderError),
    #[error("identity lookup failed: {0}")]
    UpstreamIdentity(#[source] ProviderError),
    #[error("session token could not be issued: {0}")]
    TokenSigning(#[from] TokenError),
}

/// Result of a failed callback: either a denial or an infrastructure failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Denied(#[from] Denial),
    #[error(transparent)]
    Infra(#[from] InfraFailure),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Denied(_) => StatusCode::FORBIDDEN,
            AuthError::Infra(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Text safe to show on the result page. Infrastructure details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Denied(denial) => denial.to_string(),
            AuthError::Infra(_) => {
                "We could not reach the membership service. Please try again in a moment.".to_string()
            }
        }
    }
}

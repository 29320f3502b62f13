//! Shared service-level credential with lazy refresh.
//!
//! The revalidation sweep is the only consumer. The held credential is read
//! under a shared lock; once it is within [`REFRESH_MARGIN_SECS`] of expiry the
//! next caller takes the write lock and runs the refresh grant. Patreon rotates
//! refresh tokens on use, so refreshing is single-flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use super::{with_timeout, Credential, MembershipProvider, ProviderError};

/// Refresh this many seconds before the access token expires.
pub const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum CredentialRefreshFailure {
    #[error("service credential has no refresh token")]
    NoRefreshToken,
    #[error("service credential refresh failed: {0}")]
    Provider(#[from] ProviderError),
}

pub struct CredentialManager {
    provider: Arc<dyn MembershipProvider>,
    held: RwLock<Credential>,
    margin: chrono::Duration,
    timeout: Duration,
}

impl CredentialManager {
    pub fn new(
        provider: Arc<dyn MembershipProvider>,
        initial: Credential,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            held: RwLock::new(initial),
            margin: chrono::Duration::seconds(REFRESH_MARGIN_SECS),
            timeout,
        }
    }

    /// Return a credential that is valid for at least the refresh margin,
    /// refreshing it first if needed.
    ///
    /// On failure the previously held credential is kept so a later call
    /// retries the refresh.
    pub async fn current(&self) -> Result<Credential, CredentialRefreshFailure> {
        {
            let held = self.held.read().await;
            if !held.needs_refresh(Utc::now(), self.margin) {
                return Ok(held.clone());
            }
        }

        let mut held = self.held.write().await;
        // Another caller may have refreshed while we waited for the write lock.
        if !held.needs_refresh(Utc::now(), self.margin) {
            return Ok(held.clone());
        }

        let refresh_token = held
            .refresh_token
            .clone()
            .ok_or(CredentialRefreshFailure::NoRefreshToken)?;

        tracing::info!(expires_at = %held.expires_at, "refreshing service credential");
        let mut fresh = with_timeout(self.timeout, self.provider.refresh(&refresh_token)).await?;
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = Some(refresh_token);
        }

        *held = fresh.clone();
        tracing::info!(expires_at = %fresh.expires_at, "service credential refreshed");
        Ok(fresh)
    }
}

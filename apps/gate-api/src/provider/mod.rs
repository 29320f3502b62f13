//! Membership provider seam: OAuth code exchange, identity lookup, member
//! status checks, and refresh grants against the upstream platform.

pub mod credential;
pub mod memory;
pub mod patreon;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors surfaced by a [`MembershipProvider`].
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected upstream response: {0}")]
    Decode(String),
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),
}

/// An OAuth access/refresh token pair with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True once `now` is within `margin` of the expiry (or past it).
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now >= self.expires_at - margin
    }
}

/// Membership standing as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatronStatus {
    ActivePatron,
    DeclinedPatron,
    FormerPatron,
    #[serde(other)]
    Other,
}

impl PatronStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, PatronStatus::ActivePatron)
    }
}

// ---------------------------------------------------------------------------
// JSON:API document shapes (only the parts this service reads)
// ---------------------------------------------------------------------------

/// The `/identity` response: one user resource plus side-loaded members and tiers.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityDocument {
    pub data: Resource,
    #[serde(default)]
    pub included: Vec<Resource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub relationships: HashMap<String, Relationship>,
}

impl Resource {
    /// Read a typed attribute. Missing, `null`, and mistyped values all yield `None`.
    pub fn attribute<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = self.attributes.get(name)?;
        if raw.is_null() {
            return None;
        }
        serde_json::from_value(raw.clone()).ok()
    }

    /// Resource identifiers linked under `name`, in document order.
    pub fn related(&self, name: &str) -> Vec<ResourceRef> {
        self.relationships
            .get(name)
            .map(Relationship::refs)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    data: Value,
}

impl Relationship {
    /// A to-many relationship is an array, a to-one is an object, an empty one is `null`.
    pub fn refs(&self) -> Vec<ResourceRef> {
        match &self.data {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            Value::Object(_) => serde_json::from_value(self.data.clone())
                .ok()
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Upstream membership platform.
///
/// Implemented over HTTP by [`patreon::PatreonClient`] and by in-memory fakes in tests.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    /// Trade a single-use authorization code for a user credential.
    async fn exchange_code(&self, code: &str) -> Result<Credential, ProviderError>;

    /// Fetch the identity document (user, memberships, entitled tiers) for a user credential.
    async fn fetch_identity(
        &self,
        credential: &Credential,
    ) -> Result<IdentityDocument, ProviderError>;

    /// Look up a user's standing using the shared service credential.
    ///
    /// `Ok(None)` means the user has no membership at all, which is a confirmed
    /// inactive result rather than a failure.
    async fn fetch_member_status(
        &self,
        user_id: &str,
        service_credential: &Credential,
    ) -> Result<Option<PatronStatus>, ProviderError>;

    /// Run the refresh-token grant.
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, ProviderError>;
}

/// Bound an upstream call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ProviderError::Timeout(limit))?
}

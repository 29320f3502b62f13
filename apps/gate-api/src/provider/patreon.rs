//! Patreon OAuth2 / API v2 client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::Config;

use super::{
    Credential, IdentityDocument, MembershipProvider, PatronStatus, ProviderError, Resource,
};

pub const DEFAULT_BASE_URL: &str = "https://www.patreon.com";

/// Browser-facing authorization endpoint.
pub const AUTHORIZE_URL: &str = "https://www.patreon.com/oauth2/authorize";

/// Scopes requested during login.
pub const LOGIN_SCOPES: &str = "identity identity[email] identity.memberships";

/// Campaign members pages followed before giving up on a lookup.
const MAX_MEMBER_PAGES: usize = 50;

const MEMBER_PAGE_SIZE: &str = "1000";

/// Upper bound on how long a fetched member list answers status lookups.
const MEMBER_DIRECTORY_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

impl TokenResponse {
    fn into_credential(self) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(self.expires_in),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MembersPage {
    #[serde(default)]
    data: Vec<Resource>,
    #[serde(default)]
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<String>,
}

/// Campaign members by user id, as of `fetched_at`.
struct MemberDirectory {
    fetched_at: Instant,
    statuses: HashMap<String, Option<PatronStatus>>,
}

/// HTTP client for the Patreon API.
#[derive(Clone)]
pub struct PatreonClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    campaign_id: String,
    members: Arc<Mutex<Option<MemberDirectory>>>,
    member_ttl: Duration,
}

impl PatreonClient {
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .user_agent(concat!("gate-api/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            campaign_id: config.campaign_id.clone(),
            members: Arc::new(Mutex::new(None)),
            member_ttl: MEMBER_DIRECTORY_TTL.min(config.revalidation_interval / 2),
        })
    }

    /// Point the client at a different origin (used for staging and local fakes).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// How long a fetched campaign member list is reused. Zero disables reuse.
    pub fn with_member_ttl(mut self, ttl: Duration) -> Self {
        self.member_ttl = ttl;
        self
    }

    async fn token_grant(&self, form: &[(&str, &str)]) -> Result<Credential, ProviderError> {
        let url = format!("{}/api/oauth2/token", self.base_url);
        let resp = self.http.post(&url).form(form).send().await?;
        let token: TokenResponse = read_json(resp).await?;
        Ok(token.into_credential())
    }

    /// Walk every page of the campaign's member list.
    async fn fetch_member_directory(
        &self,
        access_token: &str,
    ) -> Result<MemberDirectory, ProviderError> {
        let first = format!(
            "{}/api/oauth2/v2/campaigns/{}/members",
            self.base_url, self.campaign_id
        );
        let mut request = self.http.get(&first).query(&[
            ("include", "user"),
            ("fields[member]", "patron_status"),
            ("page[count]", MEMBER_PAGE_SIZE),
        ]);
        let mut statuses = HashMap::new();

        for page_number in 1..=MAX_MEMBER_PAGES {
            let resp = request.bearer_auth(access_token).send().await?;
            let page: MembersPage = read_json(resp).await?;

            for member in page.data.iter().filter(|m| m.kind == "member") {
                let status = member.attribute::<PatronStatus>("patron_status");
                for user in member.related("user") {
                    statuses.entry(user.id.clone()).or_insert(status.clone());
                }
            }

            match page.links.and_then(|l| l.next) {
                Some(next) => request = self.http.get(next),
                None => {
                    tracing::debug!(
                        members = statuses.len(),
                        pages = page_number,
                        "fetched campaign member list"
                    );
                    return Ok(MemberDirectory {
                        fetched_at: Instant::now(),
                        statuses,
                    });
                }
            }
        }

        tracing::warn!(pages = MAX_MEMBER_PAGES, "campaign member list hit page limit");
        Err(ProviderError::Decode(
            "campaign member list exceeded page limit".to_string(),
        ))
    }
}

#[async_trait]
impl MembershipProvider for PatreonClient {
    async fn exchange_code(&self, code: &str) -> Result<Credential, ProviderError> {
        self.token_grant(&[
            ("code", code),
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    async fn fetch_identity(
        &self,
        credential: &Credential,
    ) -> Result<IdentityDocument, ProviderError> {
        let url = format!("{}/api/oauth2/v2/identity", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("include", "memberships,memberships.currently_entitled_tiers"),
                ("fields[user]", "full_name,email"),
                ("fields[member]", "patron_status"),
                ("fields[tier]", "title"),
            ])
            .bearer_auth(&credential.access_token)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn fetch_member_status(
        &self,
        user_id: &str,
        service_credential: &Credential,
    ) -> Result<Option<PatronStatus>, ProviderError> {
        let mut directory = self.members.lock().await;
        let cached = directory
            .as_ref()
            .filter(|d| d.fetched_at.elapsed() < self.member_ttl);
        if let Some(cached) = cached {
            if let Some(status) = cached.statuses.get(user_id) {
                return Ok(status.clone());
            }
            tracing::debug!(%user_id, "user not in cached member list, refetching");
        }

        // Absence is only reported from a list fetched for this lookup.
        let fresh = self
            .fetch_member_directory(&service_credential.access_token)
            .await?;
        let status = fresh.statuses.get(user_id).cloned().flatten();
        *directory = Some(fresh);
        Ok(status)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential, ProviderError> {
        self.token_grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }
}

/// Fail on non-2xx, otherwise decode the body as `T`.
async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ProviderError> {
    let status = resp.status();
    if !status.is_success() {
        let body: String = resp.text().await.unwrap_or_default().chars().take(512).collect();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    resp.json::<T>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

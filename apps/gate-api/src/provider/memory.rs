//! In-memory [`MembershipProvider`] for local runs and tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{Credential, IdentityDocument, MembershipProvider, PatronStatus, ProviderError};

/// How a scripted status lookup behaves.
#[derive(Debug, Clone)]
enum StatusOutcome {
    Status(Option<PatronStatus>),
    Fail,
    Hang,
}

/// Number of calls made to each provider operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCalls {
    pub exchange: usize,
    pub identity: usize,
    pub status: usize,
    pub refresh: usize,
}

#[derive(Default)]
struct State {
    /// Authorization code → identity returned for the credential it exchanges into.
    identities: HashMap<String, IdentityDocument>,
    statuses: HashMap<String, StatusOutcome>,
    refresh: Option<Credential>,
    fail_identity: bool,
    calls: ProviderCalls,
    /// Access token presented on each status lookup, in call order.
    status_tokens: Vec<String>,
}

/// Scripted provider. Unknown codes fail the exchange, unknown users have no membership.
#[derive(Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `code` and resolve it to `identity`.
    pub fn add_code(&self, code: &str, identity: IdentityDocument) {
        self.state.lock().identities.insert(code.to_string(), identity);
    }

    /// Make every identity fetch fail.
    pub fn fail_identity(&self) {
        self.state.lock().fail_identity = true;
    }

    pub fn set_status(&self, user_id: &str, status: Option<PatronStatus>) {
        self.state
            .lock()
            .statuses
            .insert(user_id.to_string(), StatusOutcome::Status(status));
    }

    /// Status lookups for `user_id` fail as if the upstream were unreachable.
    pub fn fail_status(&self, user_id: &str) {
        self.state.lock().statuses.insert(user_id.to_string(), StatusOutcome::Fail);
    }

    /// Status lookups for `user_id` never complete.
    pub fn hang_status(&self, user_id: &str) {
        self.state.lock().statuses.insert(user_id.to_string(), StatusOutcome::Hang);
    }

    pub fn refresh_with(&self, credential: Credential) {
        self.state.lock().refresh = Some(credential);
    }

    pub fn fail_refresh(&self) {
        self.state.lock().refresh = None;
    }

    pub fn calls(&self) -> ProviderCalls {
        self.state.lock().calls
    }

    /// Service access tokens seen by status lookups so far.
    pub fn status_tokens(&self) -> Vec<String> {
        self.state.lock().status_tokens.clone()
    }
}

#[async_trait]
impl MembershipProvider for MemoryProvider {
    async fn exchange_code(&self, code: &str) -> Result<Credential, ProviderError> {
        let mut state = self.state.lock();
        state.calls.exchange += 1;
        if !state.identities.contains_key(code) {
            return Err(ProviderError::Status {
                status: 400,
                body: "invalid_grant".to_string(),
            });
        }
        Ok(Credential {
            access_token: format!("user:{code}"),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }

    async fn fetch_identity(
        &self,
        credential: &Credential,
    ) -> Result<IdentityDocument, ProviderError> {
        let mut state = self.state.lock();
        state.calls.identity += 1;
        if state.fail_identity {
            return Err(ProviderError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let code = credential.access_token.strip_prefix("user:").unwrap_or_default();
        state
            .identities
            .get(code)
            .cloned()
            .ok_or_else(|| ProviderError::Status {
                status: 401,
                body: "unknown token".to_string(),
            })
    }

    async fn fetch_member_status(
        &self,
        user_id: &str,
        service_credential: &Credential,
    ) -> Result<Option<PatronStatus>, ProviderError> {
        let outcome = {
            let mut state = self.state.lock();
            state.calls.status += 1;
            state.status_tokens.push(service_credential.access_token.clone());
            state
                .statuses
                .get(user_id)
                .cloned()
                .unwrap_or(StatusOutcome::Status(None))
        };

        match outcome {
            StatusOutcome::Status(status) => Ok(status),
            StatusOutcome::Fail => Err(ProviderError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            }),
            StatusOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout(Duration::from_secs(3600)))
            }
        }
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Credential, ProviderError> {
        let mut state = self.state.lock();
        state.calls.refresh += 1;
        state.refresh.clone().ok_or_else(|| ProviderError::Status {
            status: 401,
            body: "invalid_grant".to_string(),
        })
    }
}

/// Build an identity document in the provider's JSON:API shape.
///
/// Each membership is `(patron_status, [(tier_id, tier_title)])`.
pub fn identity_document(
    user_id: &str,
    full_name: &str,
    email: &str,
    memberships: &[(Option<&str>, &[(&str, &str)])],
) -> IdentityDocument {
    let mut included = Vec::new();
    let mut member_refs = Vec::new();

    for (index, (status, tiers)) in memberships.iter().enumerate() {
        let member_id = format!("member-{user_id}-{index}");
        member_refs.push(serde_json::json!({ "id": member_id, "type": "member" }));

        let tier_refs: Vec<_> = tiers
            .iter()
            .map(|(id, _)| serde_json::json!({ "id": id, "type": "tier" }))
            .collect();
        included.push(serde_json::json!({
            "id": member_id,
            "type": "member",
            "attributes": { "patron_status": status },
            "relationships": { "currently_entitled_tiers": { "data": tier_refs } }
        }));

        for (id, title) in tiers.iter() {
            included.push(serde_json::json!({
                "id": id,
                "type": "tier",
                "attributes": { "title": title }
            }));
        }
    }

    let document = serde_json::json!({
        "data": {
            "id": user_id,
            "type": "user",
            "attributes": { "full_name": full_name, "email": email },
            "relationships": { "memberships": { "data": member_refs } }
        },
        "included": included
    });

    serde_json::from_value(document)
        .unwrap_or_else(|e| panic!("fixture identity document is valid JSON:API: {e}"))
}

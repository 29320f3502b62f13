//! Flattening of the provider's identity document and tier authorization.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::Denial;
use crate::provider::{IdentityDocument, PatronStatus, Resource};

/// A membership tier the user is currently entitled to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    pub id: String,
    pub title: String,
}

/// How many memberships the identity document carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Memberships {
    None,
    Single,
    Multiple(usize),
}

impl Memberships {
    fn from_count(count: usize) -> Self {
        match count {
            0 => Memberships::None,
            1 => Memberships::Single,
            n => Memberships::Multiple(n),
        }
    }
}

/// The subset of the identity document the callback acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatIdentity {
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub is_member: bool,
    pub patron_status: Option<PatronStatus>,
    /// Entitled tiers across all memberships, deduplicated by id, first-seen order.
    pub tiers: Vec<Tier>,
    pub memberships: Memberships,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityParseError {
    #[error("identity document data is a `{0}`, expected `user`")]
    NotAUser(String),
    #[error("identity document has an empty user id")]
    MissingUserId,
}

impl FlatIdentity {
    /// Flatten an identity document.
    ///
    /// With several memberships the user counts as active if any of them is
    /// active; otherwise the first reported status is kept.
    pub fn from_document(doc: &IdentityDocument) -> Result<Self, IdentityParseError> {
        let user = &doc.data;
        if user.kind != "user" {
            return Err(IdentityParseError::NotAUser(user.kind.clone()));
        }
        if user.id.is_empty() {
            return Err(IdentityParseError::MissingUserId);
        }

        let members = member_resources(doc);

        let statuses: Vec<PatronStatus> = members
            .iter()
            .filter_map(|m| m.attribute::<PatronStatus>("patron_status"))
            .collect();
        let patron_status = statuses
            .iter()
            .find(|s| s.is_active())
            .or_else(|| statuses.first())
            .cloned();

        let mut seen = HashSet::new();
        let mut tiers = Vec::new();
        for member in &members {
            for tier_ref in member.related("currently_entitled_tiers") {
                if seen.contains(&tier_ref.id) {
                    continue;
                }
                let Some(title) = find_included(doc, "tier", &tier_ref.id)
                    .and_then(|t| t.attribute::<String>("title"))
                else {
                    continue;
                };
                seen.insert(tier_ref.id.clone());
                tiers.push(Tier {
                    id: tier_ref.id,
                    title,
                });
            }
        }

        Ok(Self {
            user_id: user.id.clone(),
            full_name: user.attribute("full_name").unwrap_or_default(),
            email: user.attribute("email").unwrap_or_default(),
            is_member: !members.is_empty(),
            patron_status,
            tiers,
            memberships: Memberships::from_count(members.len()),
        })
    }

    pub fn is_active(&self) -> bool {
        self.patron_status.as_ref().is_some_and(PatronStatus::is_active)
    }
}

/// Member resources linked from the user, falling back to every included
/// member when the relationship is absent.
fn member_resources(doc: &IdentityDocument) -> Vec<&Resource> {
    if doc.data.relationships.contains_key("memberships") {
        doc.data
            .related("memberships")
            .iter()
            .filter_map(|r| find_included(doc, "member", &r.id))
            .collect()
    } else {
        doc.included.iter().filter(|r| r.kind == "member").collect()
    }
}

fn find_included<'a>(doc: &'a IdentityDocument, kind: &str, id: &str) -> Option<&'a Resource> {
    doc.included.iter().find(|r| r.kind == kind && r.id == id)
}

/// Pick the first tier (in provider order) whose id is allow-listed.
pub fn authorize<'a>(identity: &'a FlatIdentity, allowed: &[String]) -> Result<&'a Tier, Denial> {
    match identity.memberships {
        Memberships::None => {
            info!(user_id = %identity.user_id, "denied: no membership on record");
            return Err(Denial::NotActivePatron);
        }
        Memberships::Single => {}
        Memberships::Multiple(count) => {
            debug!(
                user_id = %identity.user_id,
                count,
                tiers = identity.tiers.len(),
                "merged multiple memberships"
            );
        }
    }

    if !identity.is_active() {
        info!(
            user_id = %identity.user_id,
            status = ?identity.patron_status,
            "denied: membership not active"
        );
        return Err(Denial::NotActivePatron);
    }

    if identity.tiers.is_empty() {
        info!(user_id = %identity.user_id, "denied: active member with no entitled tiers");
        return Err(Denial::TierNotAllowed);
    }

    identity
        .tiers
        .iter()
        .find(|tier| allowed.iter().any(|id| id == &tier.id))
        .ok_or_else(|| {
            info!(
                user_id = %identity.user_id,
                tiers = ?identity.tiers.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
                "denied: no allow-listed tier"
            );
            Denial::TierNotAllowed
        })
}

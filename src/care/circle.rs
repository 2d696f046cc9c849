//! Care-circle invites, listings and state transitions

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::care::profile::{owned_profile, pick_preferred, preferred_profile, sort_by_preference};
use crate::care::relationship::RelationshipKind;
use crate::db::schemas::{LinkDoc, LinkStatus, OwnerColumn, ProfileDoc};
use crate::sms::{looks_like_email, phone_variants};
use crate::store::CareStore;
use crate::types::{CareError, Result};

pub const INVALID_PROFILE: &str = "Invalid profile selection.";
pub const NO_PROFILE: &str = "No profile available for this account.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteOutcome {
    pub link_id: String,
    pub recipient_id: String,
}

/// Resolve the sharing profile: an owned explicit id, else the preferred one
async fn sharing_profile(
    store: &dyn CareStore,
    user_id: &str,
    requested: Option<&str>,
) -> Result<ProfileDoc> {
    match requested.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => owned_profile(store, user_id, id)
            .await?
            .ok_or_else(|| CareError::Forbidden(INVALID_PROFILE.into())),
        None => preferred_profile(store, user_id)
            .await?
            .ok_or_else(|| CareError::BadRequest(NO_PROFILE.into())),
    }
}

/// Invite the user registered under a phone number into the caller's circle
pub async fn invite(
    store: &dyn CareStore,
    user_id: &str,
    contact: &str,
    profile_id: Option<&str>,
    country_code: &str,
) -> Result<InviteOutcome> {
    let contact = contact.trim();
    if contact.is_empty() {
        return Err(CareError::BadRequest("Contact is required.".into()));
    }

    let profile = sharing_profile(store, user_id, profile_id).await?;

    if looks_like_email(contact) {
        return Err(CareError::BadRequest(
            "Email invites are not supported. Use a phone number instead.".into(),
        ));
    }

    let variants = phone_variants(contact, country_code);
    let candidates = store.profiles_by_phone(&variants).await?;
    let recipient_id = sort_by_preference(&candidates)
        .into_iter()
        .find_map(|p| p.owner_id().map(str::to_string))
        .ok_or_else(|| CareError::NotFound("No registered user found with that contact.".into()))?;

    if recipient_id == user_id {
        return Err(CareError::BadRequest("You cannot invite yourself.".into()));
    }

    let existing = store
        .links_between(user_id, &recipient_id, &[LinkStatus::Pending, LinkStatus::Accepted])
        .await?;
    if !existing.is_empty() {
        return Err(CareError::BadRequest("An invite already exists for this member.".into()));
    }

    let link = store
        .insert_link(LinkDoc::new_invite(user_id, &recipient_id, Some(profile.id), None))
        .await
        .map_err(|e| match e {
            CareError::Conflict(_) => {
                CareError::BadRequest("An invite already exists for this member.".into())
            }
            other => other,
        })?;

    info!(link_id = %link.id, "Care circle invite created");
    Ok(InviteOutcome {
        link_id: link.id,
        recipient_id,
    })
}

/// One link row in the care-circle listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleMember {
    pub id: String,
    pub member_id: String,
    pub member_profile_id: Option<String>,
    pub profile_id: Option<String>,
    pub status: LinkStatus,
    pub role: RelationshipKind,
    pub display_name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircleLinks {
    pub outgoing: Vec<CircleMember>,
    pub incoming: Vec<CircleMember>,
}

fn group_by_owner(
    grouped: &mut HashMap<String, Vec<ProfileDoc>>,
    rows: Vec<ProfileDoc>,
    column: OwnerColumn,
) {
    for row in rows {
        if let Some(owner) = row.owner_value(column).map(str::to_string) {
            grouped.entry(owner).or_default().push(row);
        }
    }
}

/// Profiles of the given users grouped by owner.
///
/// Looks up by `user_id` first and by `auth_id` for users still missing.
async fn profiles_by_member(
    store: &dyn CareStore,
    member_ids: &[String],
) -> Result<HashMap<String, Vec<ProfileDoc>>> {
    let mut grouped: HashMap<String, Vec<ProfileDoc>> = HashMap::new();
    if member_ids.is_empty() {
        return Ok(grouped);
    }

    group_by_owner(
        &mut grouped,
        store.profiles_by_owners(OwnerColumn::UserId, member_ids).await?,
        OwnerColumn::UserId,
    );

    let missing: Vec<String> = member_ids
        .iter()
        .filter(|id| !grouped.contains_key(*id))
        .cloned()
        .collect();
    if !missing.is_empty() {
        match store.profiles_by_owners(OwnerColumn::AuthId, &missing).await {
            Ok(rows) => group_by_owner(&mut grouped, rows, OwnerColumn::AuthId),
            Err(e) if e.is_missing_field() => debug!("auth_id lookup unavailable: {}", e),
            Err(e) => return Err(e),
        }
    }

    Ok(grouped)
}

fn label(profile: Option<&ProfileDoc>) -> String {
    profile
        .map(crate::care::profile::display_name)
        .unwrap_or_else(|| crate::care::profile::UNKNOWN_MEMBER.to_string())
}

/// The caller's care circle, optionally narrowed to links sharing one of
/// their profiles.
pub async fn list_links(
    store: &dyn CareStore,
    user_id: &str,
    profile_id: Option<&str>,
) -> Result<CircleLinks> {
    let requested = profile_id.map(str::trim).filter(|id| !id.is_empty());
    if let Some(id) = requested {
        if owned_profile(store, user_id, id).await?.is_none() {
            return Err(CareError::Forbidden(INVALID_PROFILE.into()));
        }
    }

    let links = store.links_for_user(user_id).await?;
    let (outgoing, incoming): (Vec<&LinkDoc>, Vec<&LinkDoc>) = links
        .iter()
        .filter(|l| l.requester_id == user_id || l.recipient_id == user_id)
        .partition(|l| l.requester_id == user_id);
    let outgoing: Vec<&LinkDoc> = outgoing
        .into_iter()
        .filter(|l| requested.is_none() || l.profile_id.as_deref() == requested)
        .collect();

    let mut member_ids: Vec<String> = Vec::new();
    for link in outgoing.iter().chain(incoming.iter()) {
        if let Some(id) = link.counterpart_of(user_id) {
            if !member_ids.iter().any(|m| m == id) {
                member_ids.push(id.to_string());
            }
        }
    }
    let by_member = profiles_by_member(store, &member_ids).await?;

    let shared_ids: Vec<String> = incoming.iter().filter_map(|l| l.profile_id.clone()).collect();
    let shared: HashMap<String, ProfileDoc> = if shared_ids.is_empty() {
        HashMap::new()
    } else {
        store
            .profiles_by_ids(&shared_ids)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect()
    };

    let row = |link: &LinkDoc, member_id: &str, profile: Option<&ProfileDoc>| CircleMember {
        id: link.id.clone(),
        member_id: member_id.to_string(),
        member_profile_id: profile.map(|p| p.id.clone()),
        profile_id: link.profile_id.clone(),
        status: link.status,
        role: RelationshipKind::normalize(link.relationship.as_deref()),
        display_name: label(profile),
        created_at: link.created_at.clone(),
        updated_at: link.updated_at.clone(),
    };
    let preferred_of = |member_id: &str| {
        by_member
            .get(member_id)
            .and_then(|rows| pick_preferred(rows.as_slice()))
    };

    Ok(CircleLinks {
        outgoing: outgoing
            .iter()
            .map(|l| row(l, &l.recipient_id, preferred_of(&l.recipient_id)))
            .collect(),
        incoming: incoming
            .iter()
            .map(|l| {
                let linked = l.profile_id.as_ref().and_then(|id| shared.get(id));
                row(l, &l.requester_id, linked.or_else(|| preferred_of(&l.requester_id)))
            })
            .collect(),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondOutcome {
    pub link_id: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub decision: LinkStatus,
    pub updated_count: u64,
}

/// Accept or decline every pending invite between the link's pair.
///
/// Only the recipient may respond. Nothing besides link status changes.
pub async fn respond(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
    decision: LinkStatus,
) -> Result<RespondOutcome> {
    if decision == LinkStatus::Pending {
        return Err(CareError::BadRequest("decision must be accepted or declined.".into()));
    }

    let link = store
        .link_by_id(link_id)
        .await?
        .ok_or_else(|| CareError::NotFound("Care circle invite not found.".into()))?;

    if link.recipient_id != user_id {
        return Err(CareError::Forbidden(
            "Only the recipient can respond to this invite.".into(),
        ));
    }

    let pending = store
        .links_between(&link.requester_id, &link.recipient_id, &[LinkStatus::Pending])
        .await?;
    if pending.is_empty() {
        return Err(CareError::BadRequest(
            "No pending invites found for this member.".into(),
        ));
    }

    let updated_count = store
        .set_status_between(&link.requester_id, &link.recipient_id, LinkStatus::Pending, decision)
        .await?;

    info!(
        link_id = %link.id,
        decision = decision.as_str(),
        updated_count,
        "Care circle invites answered"
    );

    Ok(RespondOutcome {
        link_id: link.id,
        requester_id: link.requester_id,
        recipient_id: link.recipient_id,
        decision,
        updated_count,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleOutcome {
    pub link_id: String,
    pub role: RelationshipKind,
    pub status: LinkStatus,
    pub recipient_id: String,
    pub updated_count: u64,
}

/// Change the relationship kind of an accepted member.
///
/// Only the requester may do this, and only through the link sharing their
/// primary profile. Every accepted link for the pair is updated.
pub async fn update_role(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
    role: &str,
) -> Result<RoleOutcome> {
    let role = RelationshipKind::parse_role(role)
        .ok_or_else(|| CareError::BadRequest("Invalid role. Use family or friend.".into()))?;

    let link = store
        .link_by_id(link_id)
        .await?
        .ok_or_else(|| CareError::NotFound("Care circle link not found.".into()))?;

    if link.requester_id != user_id {
        return Err(CareError::Forbidden(
            "Only the care circle owner can update roles.".into(),
        ));
    }

    let profile_id = link
        .profile_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| CareError::BadRequest("Invalid care circle link profile.".into()))?;

    let primary = owned_profile(store, user_id, profile_id)
        .await?
        .map(|p| p.is_primary)
        .unwrap_or(false);
    if !primary {
        return Err(CareError::Forbidden(
            "Role updates must be performed from the primary profile link.".into(),
        ));
    }

    if link.status != LinkStatus::Accepted {
        return Err(CareError::BadRequest(
            "Role can only be updated for accepted members.".into(),
        ));
    }

    let updated_count = store
        .set_relationship_between(
            &link.requester_id,
            &link.recipient_id,
            LinkStatus::Accepted,
            role.as_str(),
        )
        .await?;

    Ok(RoleOutcome {
        link_id: link.id,
        role,
        status: link.status,
        recipient_id: link.recipient_id,
        updated_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::fixtures::{link, primary_profile, profile};
    use crate::db::schemas::{FamilyMemberDoc, FamilyRole};
    use crate::store::MemoryStore;

    fn with_phone(mut p: ProfileDoc, phone: &str) -> ProfileDoc {
        p.phone = Some(phone.to_string());
        p
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_profile(primary_profile("p-a", "alice", "Alice")).await.unwrap();
        store
            .insert_profile(with_phone(primary_profile("p-b", "bob", "Bob"), "+919876543210"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_invite_by_local_number() {
        let store = seeded().await;
        let outcome = invite(&store, "alice", "09876543210", None, "+91").await.unwrap();
        assert_eq!(outcome.recipient_id, "bob");

        let links = store.all_links().await;
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].status, LinkStatus::Pending);
        assert_eq!(links[0].relationship.as_deref(), Some("friend"));
        assert_eq!(links[0].profile_id.as_deref(), Some("p-a"));
    }

    #[tokio::test]
    async fn test_invite_rejections() {
        let store = seeded().await;

        let err = invite(&store, "alice", "bob@example.com", None, "+91").await.unwrap_err();
        assert!(err.to_string().starts_with("Email invites"));

        let err = invite(&store, "alice", "5550000", None, "+91").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::NOT_FOUND);

        let err = invite(&store, "alice", "9876543210", Some("p-b"), "+91").await.unwrap_err();
        assert_eq!(err.to_string(), INVALID_PROFILE);

        let err = invite(&store, "bob", "9876543210", None, "+91").await.unwrap_err();
        assert_eq!(err.to_string(), "You cannot invite yourself.");

        invite(&store, "alice", "9876543210", None, "+91").await.unwrap();
        let err = invite(&store, "alice", "9876543210", None, "+91").await.unwrap_err();
        assert_eq!(err.to_string(), "An invite already exists for this member.");
    }

    #[tokio::test]
    async fn test_invite_leaves_family_unset() {
        let store = seeded().await;
        store
            .insert_family_member(FamilyMemberDoc {
                id: "fm".into(),
                family_id: "fam-1".into(),
                user_id: "alice".into(),
                role: FamilyRole::Owner,
                created_at: String::new(),
            })
            .await
            .unwrap();

        let outcome = invite(&store, "alice", "9876543210", None, "+91").await.unwrap();
        let created = store.link_by_id(&outcome.link_id).await.unwrap().unwrap();
        assert!(created.family_id.is_none());
    }

    #[tokio::test]
    async fn test_accept_transitions_every_pending_link() {
        let store = MemoryStore::new();
        for id in ["l1", "l2", "l3"] {
            let mut l = link(id, "alice", "bob", LinkStatus::Pending);
            l.family_id = Some("fam".into());
            store.insert_link(l).await.unwrap();
        }
        store.insert_link(link("other", "carol", "bob", LinkStatus::Pending)).await.unwrap();

        let outcome = respond(&store, "bob", "l2", LinkStatus::Accepted).await.unwrap();
        assert_eq!(outcome.updated_count, 3);

        for l in store.all_links().await {
            let expected = if l.id == "other" { LinkStatus::Pending } else { LinkStatus::Accepted };
            assert_eq!(l.status, expected, "link {}", l.id);
        }
        assert!(store.family_membership("bob").await.unwrap().is_none());

        let err = respond(&store, "bob", "l1", LinkStatus::Declined).await.unwrap_err();
        assert_eq!(err.to_string(), "No pending invites found for this member.");
        assert_eq!(err.status_code(), hyper::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_accept_touches_only_link_status() {
        let store = MemoryStore::new();
        let mut l = link("l1", "alice", "bob", LinkStatus::Pending);
        l.family_id = Some("fam".into());
        store.insert_link(l).await.unwrap();
        store.fail("family_membership");

        let outcome = respond(&store, "bob", "l1", LinkStatus::Accepted).await.unwrap();
        assert_eq!(outcome.updated_count, 1);
        let statuses: Vec<_> = store.all_links().await.into_iter().map(|l| l.status).collect();
        assert_eq!(statuses, vec![LinkStatus::Accepted]);
    }

    #[tokio::test]
    async fn test_only_recipient_responds() {
        let store = MemoryStore::new();
        store.insert_link(link("l1", "alice", "bob", LinkStatus::Pending)).await.unwrap();
        let err = respond(&store, "alice", "l1", LinkStatus::Accepted).await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_update_role_from_primary_link() {
        let store = seeded().await;
        let mut accepted = link("l1", "alice", "bob", LinkStatus::Accepted);
        accepted.profile_id = Some("p-a".into());
        store.insert_link(accepted.clone()).await.unwrap();
        let mut second = accepted.clone();
        second.id = "l2".into();
        store.insert_link(second).await.unwrap();

        let outcome = update_role(&store, "alice", "l1", " Family").await.unwrap();
        assert_eq!(outcome.role, RelationshipKind::Family);
        assert_eq!(outcome.updated_count, 2);

        let err = update_role(&store, "bob", "l1", "friend").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::FORBIDDEN);
        let err = update_role(&store, "alice", "l1", "cousin").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_role_rejects_secondary_profile() {
        let store = seeded().await;
        store.insert_profile(profile("p-a2", "alice", "Alice (kid)")).await.unwrap();
        let mut accepted = link("l1", "alice", "bob", LinkStatus::Accepted);
        accepted.profile_id = Some("p-a2".into());
        store.insert_link(accepted).await.unwrap();

        let err = update_role(&store, "alice", "l1", "family").await.unwrap_err();
        assert!(err.to_string().contains("primary profile"));
    }

    #[tokio::test]
    async fn test_list_links_names_members() {
        let store = seeded().await;
        let mut out = link("l1", "alice", "bob", LinkStatus::Accepted);
        out.profile_id = Some("p-a".into());
        store.insert_link(out).await.unwrap();

        let alice = list_links(&store, "alice", None).await.unwrap();
        assert_eq!(alice.outgoing.len(), 1);
        assert_eq!(alice.outgoing[0].display_name, "Bob");
        assert_eq!(alice.outgoing[0].member_profile_id.as_deref(), Some("p-b"));
        assert_eq!(alice.outgoing[0].role, RelationshipKind::Friend);

        let bob = list_links(&store, "bob", None).await.unwrap();
        assert_eq!(bob.incoming.len(), 1);
        assert_eq!(bob.incoming[0].display_name, "Alice");
        assert_eq!(bob.incoming[0].member_profile_id.as_deref(), Some("p-a"));

        let err = list_links(&store, "bob", Some("p-a")).await.unwrap_err();
        assert_eq!(err.to_string(), INVALID_PROFILE);
    }

    #[tokio::test]
    async fn test_list_links_legacy_profiles() {
        let store = MemoryStore::new().without_auth_id_column();
        let mut legacy = profile("p-b", "ignored", "Bob");
        legacy.auth_id = None;
        legacy.user_id = Some("bob".into());
        store.insert_profile(legacy).await.unwrap();
        store.insert_link(link("l1", "alice", "bob", LinkStatus::Pending)).await.unwrap();

        let alice = list_links(&store, "alice", None).await.unwrap();
        assert_eq!(alice.outgoing[0].display_name, "Bob");
    }
}

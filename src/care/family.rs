//! Family groups
//!
//! The group a user belongs to is resolved from their links (accepted
//! first, then pending). Group ownership, needed only for deletion, comes
//! from the membership rows.

use std::collections::BTreeMap;
use tracing::{info, warn};

use serde_json::{Map, Value};

use crate::care::members::{details_for_profile, MemberDetails, MEMBER_PROFILE_NOT_FOUND};
use crate::care::policy::{authorize_group_link, authorize_group_member, FAMILY_MEMBER_DENIED};
use crate::care::profile::{pick_preferred, with_owner_fallback};
use crate::care::relationship::{aggregate, resolve_group_id, LinkOverview};
use crate::db::schemas::{FamilyDoc, FamilyMemberDoc, FamilyRole, LinkDoc, LinkStatus, ProfileDoc};
use crate::store::CareStore;
use crate::types::{new_id, CareError, Result};
use crate::vault::{object_path, ListOptions, Vault, VaultFile, VaultFolder};

pub const MEMBER_ID_REQUIRED: &str = "Member ID is required.";

/// Every link touching the caller plus their resolved group id
pub async fn family_links(store: &dyn CareStore, user_id: &str) -> Result<LinkOverview> {
    aggregate(store, user_id).await
}

/// Relation labels the caller gave to members of their group
pub async fn relations(
    store: &dyn CareStore,
    user_id: &str,
    member_ids: &[String],
) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    if member_ids.is_empty() {
        return Ok(out);
    }

    let links = store.links_for_user(user_id).await?;
    let Some(group) = resolve_group_id(user_id, &links) else {
        return Ok(out);
    };

    for link in links
        .iter()
        .filter(|l| l.status == LinkStatus::Accepted && l.family_id.as_deref() == Some(group.as_str()))
    {
        let (Some(side), Some(other)) = (link.side_of(user_id), link.counterpart_of(user_id)) else {
            continue;
        };
        if !member_ids.iter().any(|m| m == other) {
            continue;
        }
        if let Some(relation) = link.relation_for(side).filter(|r| !r.is_empty()) {
            out.insert(other.to_string(), relation.to_string());
        }
    }
    Ok(out)
}

/// Store the caller's label for a member of their group
pub async fn set_relation(
    store: &dyn CareStore,
    user_id: &str,
    member_id: &str,
    relation: &str,
) -> Result<()> {
    let member_id = member_id.trim();
    if member_id.is_empty() {
        return Err(CareError::BadRequest("Member ID is required.".into()));
    }

    let links = store.links_for_user(user_id).await?;
    let group = resolve_group_id(user_id, &links)
        .ok_or_else(|| CareError::Forbidden("No family available.".into()))?;

    let link = links
        .iter()
        .find(|l| {
            l.status == LinkStatus::Accepted
                && l.family_id.as_deref() == Some(group.as_str())
                && l.counterpart_of(user_id) == Some(member_id)
        })
        .ok_or_else(|| CareError::Forbidden(FAMILY_MEMBER_DENIED.into()))?;

    let side = link
        .side_of(user_id)
        .ok_or_else(|| CareError::Forbidden(FAMILY_MEMBER_DENIED.into()))?;
    let relation = Some(relation.trim().to_string()).filter(|r| !r.is_empty());
    store.set_link_relation(&link.id, side, relation).await?;
    Ok(())
}

/// Create a group owned by the caller
pub async fn create_family(store: &dyn CareStore, user_id: &str, name: &str) -> Result<FamilyDoc> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CareError::BadRequest("Family name is required.".into()));
    }
    if store.family_membership(user_id).await?.is_some() {
        return Err(CareError::BadRequest("You already belong to a family.".into()));
    }

    let family = store
        .insert_family(FamilyDoc {
            id: new_id(),
            name: name.to_string(),
            created_by: user_id.to_string(),
            created_at: String::new(),
        })
        .await?;
    store
        .insert_family_member(FamilyMemberDoc {
            id: new_id(),
            family_id: family.id.clone(),
            user_id: user_id.to_string(),
            role: FamilyRole::Owner,
            created_at: String::new(),
        })
        .await?;

    info!(family_id = %family.id, "Family created");
    Ok(family)
}

/// Delete the caller's group: join requests, links, members, then the group.
///
/// Steps are not transactional; a failure leaves earlier steps applied.
pub async fn delete_family(store: &dyn CareStore, user_id: &str) -> Result<String> {
    let membership = store
        .family_membership(user_id)
        .await?
        .ok_or_else(|| CareError::Forbidden(FAMILY_MEMBER_DENIED.into()))?;
    if membership.role != FamilyRole::Owner {
        return Err(CareError::Forbidden(
            "Only the family owner can delete this family.".into(),
        ));
    }

    let family_id = membership.family_id;
    let requests = store.delete_family_join_requests(&family_id).await?;
    let links = store.delete_links_in_family(&family_id).await?;
    let members = store.delete_family_members(&family_id).await?;
    store.delete_family(&family_id).await?;

    info!(family_id = %family_id, requests, links, members, "Family deleted");
    Ok(family_id)
}

/// Storage owner (profile id) and account id behind a member id.
///
/// `member_id` may be a profile id or a user id; a user id resolves to that
/// user's preferred profile. Unknown ids resolve to themselves.
async fn resolve_member(store: &dyn CareStore, member_id: &str) -> Result<(Option<ProfileDoc>, String)> {
    if let Some(profile) = store.profile_by_id(member_id).await? {
        let account = profile.owner_id().unwrap_or(member_id).to_string();
        return Ok((Some(profile), account));
    }
    let candidates = with_owner_fallback(|column| store.profiles_by_owner(column, member_id)).await?;
    Ok(match pick_preferred(&candidates) {
        Some(p) => {
            let account = p.owner_id().unwrap_or(member_id).to_string();
            (Some(p.clone()), account)
        }
        None => (None, member_id.to_string()),
    })
}

fn require_member_id(member_id: &str) -> Result<&str> {
    let member_id = member_id.trim();
    if member_id.is_empty() {
        return Err(CareError::BadRequest(MEMBER_ID_REQUIRED.into()));
    }
    Ok(member_id)
}

async fn authorized_member(
    store: &dyn CareStore,
    viewer_id: &str,
    member_id: &str,
) -> Result<(Option<ProfileDoc>, String)> {
    let member_id = require_member_id(member_id)?;
    let (profile, account_id) = resolve_member(store, member_id).await?;
    if let Err(e) = authorize_group_member(store, viewer_id, &account_id).await {
        warn!(viewer = %viewer_id, "Family member access denied");
        return Err(e);
    }
    let storage_owner = profile.as_ref().map_or_else(|| member_id.to_string(), |p| p.id.clone());
    Ok((profile, storage_owner))
}

/// Resolve the object path of a group member's vault file
pub async fn member_vault_path(
    store: &dyn CareStore,
    viewer_id: &str,
    member_id: &str,
    folder: VaultFolder,
    name: &str,
) -> Result<String> {
    let (_, storage_owner) = authorized_member(store, viewer_id, member_id).await?;
    object_path(&storage_owner, folder, name)
}

/// List a group member's vault files
pub async fn member_vault_files(
    store: &dyn CareStore,
    vault: &Vault,
    viewer_id: &str,
    member_id: &str,
    options: &ListOptions,
) -> Result<Vec<VaultFile>> {
    let (_, storage_owner) = authorized_member(store, viewer_id, member_id).await?;
    vault.list(&storage_owner, options).await
}

/// Personal, health and record data of a group member's preferred profile
pub async fn group_member_details(
    store: &dyn CareStore,
    viewer_id: &str,
    member_id: &str,
) -> Result<MemberDetails> {
    let (profile, _) = authorized_member(store, viewer_id, member_id).await?;
    let profile = profile.ok_or_else(|| CareError::NotFound(MEMBER_PROFILE_NOT_FOUND.into()))?;
    details_for_profile(store, &profile).await
}

const GROUP_HEALTH_FIELDS: &[&str] = &[
    "date_of_birth",
    "blood_group",
    "current_diagnosed_condition",
    "allergies",
    "ongoing_treatments",
    "current_medication",
    "bmi",
    "age",
];

/// Health summary of a member the viewer is linked to inside their group.
///
/// `None` when the member has no health row yet.
pub async fn member_health(
    store: &dyn CareStore,
    viewer_id: &str,
    member_id: &str,
) -> Result<Option<Map<String, Value>>> {
    let member_id = require_member_id(member_id)?;
    authorize_group_link(store, viewer_id, member_id).await?;

    let (profile, _) = resolve_member(store, member_id).await?;
    let Some(profile) = profile else {
        return Ok(None);
    };
    let Some(health) = store.health_by_profile(&profile.id).await? else {
        return Ok(None);
    };

    Ok(Some(
        GROUP_HEALTH_FIELDS
            .iter()
            .map(|field| {
                let value = health.fields.get(*field).cloned().unwrap_or(Value::Null);
                (field.to_string(), value)
            })
            .collect(),
    ))
}

/// Send a pending link to the user registered under exactly `contact`
pub async fn invite_to_family(store: &dyn CareStore, user_id: &str, contact: &str) -> Result<LinkDoc> {
    let contact = contact.trim();
    if contact.is_empty() {
        return Err(CareError::BadRequest("Contact is required".into()));
    }

    let not_found = || CareError::NotFound("User not found with this phone number".into());
    let candidates = store.profiles_by_phone(&[contact.to_string()]).await?;
    let recipient_id = pick_preferred(&candidates)
        .and_then(|p| p.owner_id())
        .map(str::to_string)
        .ok_or_else(not_found)?;
    if recipient_id == user_id {
        return Err(CareError::BadRequest("You cannot invite yourself.".into()));
    }

    let duplicate = || CareError::Conflict("Invite already sent to this user".into());
    let existing = store
        .links_between(user_id, &recipient_id, &[LinkStatus::Pending, LinkStatus::Accepted])
        .await?;
    if !existing.is_empty() {
        return Err(duplicate());
    }

    let invite = LinkDoc {
        relationship: None,
        ..LinkDoc::new_invite(user_id, &recipient_id, None, None)
    };
    let link = store.insert_link(invite).await.map_err(|e| match e {
        CareError::Conflict(_) => duplicate(),
        other => other,
    })?;
    info!(link_id = %link.id, "Family invite sent");
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::fixtures::{link, profile};
    use crate::db::schemas::{FamilyJoinRequestDoc, HealthDoc};
    use crate::store::MemoryStore;

    fn grouped(id: &str, a: &str, b: &str, status: LinkStatus, family: &str) -> LinkDoc {
        let mut l = link(id, a, b, status);
        l.family_id = Some(family.to_string());
        l
    }

    #[tokio::test]
    async fn test_relations_round_trip_per_side() {
        let store = MemoryStore::new();
        store
            .insert_link(grouped("l1", "alice", "bob", LinkStatus::Accepted, "fam"))
            .await
            .unwrap();

        set_relation(&store, "alice", "bob", " Brother ").await.unwrap();
        set_relation(&store, "bob", "alice", "Sister").await.unwrap();

        let alice = relations(&store, "alice", &["bob".to_string()]).await.unwrap();
        assert_eq!(alice.get("bob").map(String::as_str), Some("Brother"));
        let bob = relations(&store, "bob", &["alice".to_string()]).await.unwrap();
        assert_eq!(bob.get("alice").map(String::as_str), Some("Sister"));

        set_relation(&store, "alice", "bob", "").await.unwrap();
        let cleared = relations(&store, "alice", &["bob".to_string()]).await.unwrap();
        assert!(cleared.is_empty());
    }

    #[tokio::test]
    async fn test_set_relation_requires_group_link() {
        let store = MemoryStore::new();
        let err = set_relation(&store, "alice", "bob", "x").await.unwrap_err();
        assert_eq!(err.to_string(), "No family available.");

        store
            .insert_link(grouped("l1", "alice", "carol", LinkStatus::Accepted, "fam"))
            .await
            .unwrap();
        let err = set_relation(&store, "alice", "bob", "x").await.unwrap_err();
        assert_eq!(err.to_string(), FAMILY_MEMBER_DENIED);
    }

    #[tokio::test]
    async fn test_create_then_delete_family() {
        let store = MemoryStore::new();
        let family = create_family(&store, "alice", "Sharmas").await.unwrap();
        let err = create_family(&store, "alice", "Again").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::BAD_REQUEST);

        store
            .insert_link(grouped("l1", "alice", "bob", LinkStatus::Accepted, &family.id))
            .await
            .unwrap();
        store
            .insert_join_request(FamilyJoinRequestDoc {
                id: "jr".into(),
                family_id: family.id.clone(),
                user_id: "dave".into(),
                status: "pending".into(),
                created_at: String::new(),
            })
            .await;

        assert_eq!(delete_family(&store, "alice").await.unwrap(), family.id);
        assert_eq!(store.family_count().await, 0);
        assert_eq!(store.join_request_count().await, 0);
        assert!(store.all_links().await.is_empty());
        assert!(store.family_membership("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_partial_failure_keeps_earlier_steps() {
        let store = MemoryStore::new();
        let family = create_family(&store, "alice", "Sharmas").await.unwrap();
        store
            .insert_link(grouped("l1", "alice", "bob", LinkStatus::Accepted, &family.id))
            .await
            .unwrap();
        store.fail("delete_family_members");

        let err = delete_family(&store, "alice").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store.all_links().await.is_empty());
        assert_eq!(store.family_count().await, 1);
        assert!(store.family_membership("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_only_owner_deletes() {
        let store = MemoryStore::new();
        let family = create_family(&store, "alice", "Sharmas").await.unwrap();
        store
            .insert_family_member(FamilyMemberDoc {
                id: "m".into(),
                family_id: family.id,
                user_id: "bob".into(),
                role: FamilyRole::Member,
                created_at: String::new(),
            })
            .await
            .unwrap();
        let err = delete_family(&store, "bob").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_member_vault_path_group_scoped() {
        let store = MemoryStore::new();
        store.insert_profile(profile("p-bob", "bob", "Bob")).await.unwrap();
        // friend link still shares the group
        store
            .insert_link(grouped("l1", "alice", "bob", LinkStatus::Accepted, "fam"))
            .await
            .unwrap();

        let by_user = member_vault_path(&store, "alice", "bob", VaultFolder::Reports, "x.pdf")
            .await
            .unwrap();
        assert_eq!(by_user, "p-bob/reports/x.pdf");
        let by_profile = member_vault_path(&store, "alice", "p-bob", VaultFolder::Bills, "y.png")
            .await
            .unwrap();
        assert_eq!(by_profile, "p-bob/bills/y.png");

        let err = member_vault_path(&store, "carol", "bob", VaultFolder::Reports, "x.pdf")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_member_vault_files_lists_member_profile() {
        use crate::vault::{MemoryObjectStore, UrlSigner};
        use bytes::Bytes;
        use std::sync::Arc;

        let store = MemoryStore::new();
        store.insert_profile(profile("p-bob", "bob", "Bob")).await.unwrap();
        store
            .insert_link(grouped("l1", "alice", "bob", LinkStatus::Accepted, "fam"))
            .await
            .unwrap();
        let objects = Arc::new(MemoryObjectStore::new());
        objects.put_at("p-bob/reports/1-a.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00Z").await;
        objects.put_at("p-eve/reports/1-b.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00Z").await;
        let signer = UrlSigner::new("test-secret-that-is-at-least-32-characters", "http://localhost", "medical-vault", 60);
        let vault = Vault::new(objects, signer, 1024);

        let all = ListOptions::from_query(None, Some("false"), None, None);
        let files = member_vault_files(&store, &vault, "alice", "bob", &all).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].folder, VaultFolder::Reports);

        let unknown = ListOptions::from_query(Some("x-rays"), None, None, None);
        assert!(member_vault_files(&store, &vault, "alice", "p-bob", &unknown).await.unwrap().is_empty());

        let err = member_vault_files(&store, &vault, "eve", "bob", &all).await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::FORBIDDEN);
        let err = member_vault_files(&store, &vault, "alice", " ", &all).await.unwrap_err();
        assert_eq!(err.to_string(), MEMBER_ID_REQUIRED);
    }

    #[tokio::test]
    async fn test_group_member_details() {
        let store = MemoryStore::new();
        store.insert_profile(profile("p-bob", "bob", "Bob")).await.unwrap();
        store
            .insert_link(grouped("l1", "alice", "bob", LinkStatus::Accepted, "fam"))
            .await
            .unwrap();
        store
            .insert_link(grouped("l2", "alice", "carol", LinkStatus::Accepted, "fam"))
            .await
            .unwrap();

        let details = group_member_details(&store, "alice", "bob").await.unwrap();
        assert_eq!(details.personal.display_name.as_deref(), Some("Bob"));
        assert!(details.health.is_none());

        // carol shares the group but owns no profile
        let err = group_member_details(&store, "alice", "carol").await.unwrap_err();
        assert_eq!(err.to_string(), MEMBER_PROFILE_NOT_FOUND);
        let err = group_member_details(&store, "dave", "bob").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_member_health_whitelists_fields() {
        let store = MemoryStore::new();
        store.insert_profile(profile("p-bob", "bob", "Bob")).await.unwrap();
        let mut fields = Map::new();
        fields.insert("blood_group".into(), Value::from("B+"));
        fields.insert("height_cm".into(), Value::from(180));
        store
            .insert_health(HealthDoc {
                id: "h".into(),
                profile_id: "p-bob".into(),
                fields,
            })
            .await;
        store
            .insert_link(grouped("l1", "alice", "bob", LinkStatus::Accepted, "fam"))
            .await
            .unwrap();
        store
            .insert_link(grouped("l2", "carol", "bob", LinkStatus::Accepted, "fam"))
            .await
            .unwrap();

        let health = member_health(&store, "alice", "bob").await.unwrap().unwrap();
        assert_eq!(health.len(), GROUP_HEALTH_FIELDS.len());
        assert_eq!(health["blood_group"], Value::from("B+"));
        assert_eq!(health["age"], Value::Null);
        assert!(!health.contains_key("height_cm"));

        // same group, no direct link
        let err = member_health(&store, "alice", "carol").await.unwrap_err();
        assert_eq!(err.to_string(), FAMILY_MEMBER_DENIED);
        assert!(member_health(&store, "alice", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invite_to_family() {
        let store = MemoryStore::new();
        let mut bob = profile("p-bob", "bob", "Bob");
        bob.phone = Some("+919876543210".into());
        store.insert_profile(bob).await.unwrap();

        let err = invite_to_family(&store, "alice", " ").await.unwrap_err();
        assert_eq!(err.to_string(), "Contact is required");
        let err = invite_to_family(&store, "alice", "9876543210").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::NOT_FOUND);

        let link = invite_to_family(&store, "alice", "+919876543210").await.unwrap();
        assert_eq!(link.recipient_id, "bob");
        assert_eq!(link.status, LinkStatus::Pending);
        assert!(link.family_id.is_none());

        let err = invite_to_family(&store, "alice", "+919876543210").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::CONFLICT);
        let err = invite_to_family(&store, "bob", "+919876543210").await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::BAD_REQUEST);
    }
}

//! Profile management for the owning user

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::care::activity::{
    log_activity, profile_feed, ActivityAction, ActivityDomain, ActivityEvent, FeedEntry,
    FeedWindow,
};
use crate::care::profile::{owned_profile, owned_profiles, pick_preferred};
use crate::db::schemas::{OwnerColumn, ProfileDoc};
use crate::store::CareStore;
use crate::types::{new_id, CareError, Result};
use crate::vault::{ListOptions, Vault};

pub const PROFILE_DENIED: &str = "Not allowed for this profile.";

fn profile_denied() -> CareError {
    CareError::Forbidden(PROFILE_DENIED.into())
}

fn require_profile_id(raw: Option<&str>) -> Result<&str> {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CareError::BadRequest("profileId is required.".into()))
}

/// Profile as returned to its owner
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProfileView {
    pub id: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub is_primary: bool,
    pub created_at: Option<String>,
}

impl From<ProfileDoc> for ProfileView {
    fn from(doc: ProfileDoc) -> Self {
        Self {
            id: doc.id,
            name: doc.name,
            display_name: doc.display_name,
            phone: doc.phone,
            gender: doc.gender,
            address: doc.address,
            is_primary: doc.is_primary,
            created_at: doc.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileList {
    pub profiles: Vec<ProfileView>,
    pub preferred_profile_id: Option<String>,
}

pub async fn list_profiles(store: &dyn CareStore, user_id: &str) -> Result<ProfileList> {
    let profiles = owned_profiles(store, user_id).await?;
    let preferred_profile_id = pick_preferred(&profiles).map(|p| p.id.clone());
    Ok(ProfileList {
        profiles: profiles.into_iter().map(ProfileView::from).collect(),
        preferred_profile_id,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Create a profile; a user's first profile becomes primary
pub async fn create_profile(store: &dyn CareStore, user_id: &str, input: ProfileInput) -> Result<ProfileView> {
    let name = clean(input.name).ok_or_else(|| CareError::BadRequest("Profile name is required.".into()))?;
    let existing = owned_profiles(store, user_id).await?;

    let profile = ProfileDoc {
        id: new_id(),
        auth_id: Some(user_id.to_string()),
        user_id: Some(user_id.to_string()),
        display_name: clean(input.display_name).or_else(|| Some(name.clone())),
        name: Some(name),
        phone: clean(input.phone),
        gender: clean(input.gender),
        address: clean(input.address),
        is_primary: !existing.iter().any(|p| p.is_primary),
        created_at: None,
        updated_at: None,
    };

    store.insert_profile(profile).await.map(ProfileView::from)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedProfile {
    pub deleted: bool,
    pub removed_vault_files: u64,
}

/// Delete a non-primary profile and everything stored under it.
///
/// Steps run in order without rollback: vault objects, medical data,
/// activity rows, then the profile row. The profile row survives when the
/// vault could not be emptied.
pub async fn delete_profile(
    store: &dyn CareStore,
    vault: &Vault,
    user_id: &str,
    profile_id: Option<&str>,
) -> Result<DeletedProfile> {
    let profile_id = require_profile_id(profile_id)?;
    let profile = owned_profile(store, user_id, profile_id)
        .await?
        .ok_or_else(profile_denied)?;

    if profile.is_primary {
        return Err(CareError::BadRequest("Primary profile cannot be deleted.".into()));
    }

    let removed_vault_files = purge_vault(vault, &profile.id).await?;
    remove_profile_rows(store, &profile.id).await?;

    info!(profile_id = %profile.id, removed_vault_files, "Profile deleted");
    Ok(DeletedProfile {
        deleted: true,
        removed_vault_files,
    })
}

/// Empty an owner's vault and check nothing is left behind
async fn purge_vault(vault: &Vault, owner: &str) -> Result<u64> {
    let removed = vault.purge(owner).await?;
    let remaining = vault
        .list(
            owner,
            &ListOptions {
                include_signed: false,
                ..ListOptions::default()
            },
        )
        .await?;
    if !remaining.is_empty() {
        warn!(
            owner = %owner,
            remaining = remaining.len(),
            "Delete blocked by incomplete vault cleanup"
        );
        return Err(CareError::Storage(
            "Could not fully remove vault files. Please retry deletion.".into(),
        ));
    }
    Ok(removed)
}

/// Medical data, activity rows, then the profile row itself
async fn remove_profile_rows(store: &dyn CareStore, profile_id: &str) -> Result<()> {
    store.delete_medical_data(profile_id).await?;
    store.delete_activity_for_profile(profile_id).await?;
    store.delete_profile(profile_id).await?;
    Ok(())
}

pub const DELETE_CONFIRMATION: &str = "DELETE";

/// Treat a missing column or collection as nothing to delete
fn tolerate_missing(step: &str, result: Result<u64>) -> Result<u64> {
    match result {
        Err(e) if e.is_missing_field() => {
            debug!(step = %step, "Skipping cleanup step: {}", e);
            Ok(0)
        }
        other => other,
    }
}

/// Every profile owned through either owner column
async fn account_profiles(store: &dyn CareStore, user_id: &str) -> Result<Vec<ProfileDoc>> {
    let mut profiles: Vec<ProfileDoc> = Vec::new();
    for column in [OwnerColumn::AuthId, OwnerColumn::UserId] {
        let rows = match store.profiles_by_owner(column, user_id).await {
            Ok(rows) => rows,
            Err(e) if e.is_missing_field() => continue,
            Err(e) => return Err(e),
        };
        for row in rows {
            if !profiles.iter().any(|p| p.id == row.id) {
                profiles.push(row);
            }
        }
    }
    Ok(profiles)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedAccount {
    pub message: &'static str,
    pub mode: &'static str,
    pub removed_profiles: usize,
    pub removed_vault_files: u64,
}

/// Delete an account and everything it owns.
///
/// `confirmation` must read `DELETE` (any case). Vaults are emptied and
/// verified first; then links, group membership and join requests, each
/// profile's rows, per-account state, groups left without members, and
/// finally the credential. Steps do not roll back; a rerun picks up where
/// a failed one stopped.
pub async fn delete_account(
    store: &dyn CareStore,
    vault: &Vault,
    user_id: &str,
    confirmation: Option<&str>,
) -> Result<DeletedAccount> {
    if !confirmation.is_some_and(|c| c.trim().eq_ignore_ascii_case(DELETE_CONFIRMATION)) {
        return Err(CareError::BadRequest(
            "Confirmation text is required to delete the account.".into(),
        ));
    }

    let profiles = account_profiles(store, user_id).await?;

    let mut removed_vault_files = 0;
    for owner in profiles.iter().map(|p| p.id.as_str()).chain([user_id]) {
        removed_vault_files += purge_vault(vault, owner).await?;
    }

    let mut touched_families: Vec<String> = store
        .links_for_user(user_id)
        .await?
        .into_iter()
        .filter_map(|l| l.family_id)
        .collect();
    if let Some(membership) = store.family_membership(user_id).await? {
        touched_families.push(membership.family_id);
    }
    touched_families.sort();
    touched_families.dedup();

    tolerate_missing("links", store.delete_links_for_user(user_id).await)?;
    tolerate_missing("family_members", store.delete_family_membership(user_id).await)?;
    tolerate_missing("join_requests", store.delete_join_requests_for_user(user_id).await)?;

    for profile in &profiles {
        remove_profile_rows(store, &profile.id).await?;
    }

    tolerate_missing("notification_states", store.delete_notification_states(user_id).await)?;
    tolerate_missing("remembered_devices", store.delete_remembered_devices_for_user(user_id).await)?;

    for family_id in &touched_families {
        if tolerate_missing("family_count", store.family_member_count(family_id).await)? > 0 {
            continue;
        }
        store.delete_family_join_requests(family_id).await?;
        store.delete_links_in_family(family_id).await?;
        store.delete_family_members(family_id).await?;
        store.delete_family(family_id).await?;
        debug!(family_id = %family_id, "Removed group left without members");
    }

    if !account_profiles(store, user_id).await?.is_empty() {
        return Err(CareError::Database(
            "Owned profiles still exist after cleanup.".into(),
        ));
    }

    store.delete_credential(user_id).await?;

    info!(
        user_id = %user_id,
        profiles = profiles.len(),
        removed_vault_files,
        "Account deleted"
    );
    Ok(DeletedAccount {
        message: "Account deleted.",
        mode: "hard",
        removed_profiles: profiles.len(),
        removed_vault_files,
    })
}

/// Activity row written by a profile owner about their own profile
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnActivity {
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub entity: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn record_own_activity(store: &dyn CareStore, user_id: &str, input: OwnActivity) -> Result<()> {
    let profile_id = require_profile_id(input.profile_id.as_deref())?;
    let domain = input
        .domain
        .as_deref()
        .and_then(ActivityDomain::parse)
        .ok_or_else(|| CareError::BadRequest("Invalid domain.".into()))?;
    let action = input
        .action
        .as_deref()
        .and_then(ActivityAction::parse)
        .ok_or_else(|| CareError::BadRequest("Invalid action.".into()))?;

    owned_profile(store, user_id, profile_id)
        .await?
        .ok_or_else(profile_denied)?;

    let mut event = ActivityEvent::new(profile_id, user_id, domain, action);
    if let Some(Value::Object(entity)) = input.entity {
        event.entity_id = entity.get("id").and_then(Value::as_str).map(str::to_string);
        event.entity_label = entity.get("label").and_then(Value::as_str).map(str::to_string);
    }
    event.metadata = match input.metadata {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    log_activity(store, event).await;
    Ok(())
}

pub async fn own_feed(
    store: &dyn CareStore,
    user_id: &str,
    profile_id: Option<&str>,
    window: FeedWindow,
) -> Result<Vec<FeedEntry>> {
    let profile_id = require_profile_id(profile_id)?;
    owned_profile(store, user_id, profile_id)
        .await?
        .ok_or_else(profile_denied)?;
    profile_feed(store, profile_id, window).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::fixtures::{primary_profile, profile};
    use crate::db::schemas::{HealthDoc, RecordKind};
    use crate::store::MemoryStore;
    use crate::vault::{MemoryObjectStore, UrlSigner};
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::Arc;

    fn vault_over(objects: Arc<MemoryObjectStore>) -> Vault {
        let signer = UrlSigner::new("test-secret-that-is-at-least-32-characters", "http://localhost", "medical-vault", 60);
        Vault::new(objects, signer, 1024)
    }

    #[tokio::test]
    async fn test_first_profile_is_primary() {
        let store = MemoryStore::new();
        let first = create_profile(
            &store,
            "u1",
            ProfileInput {
                name: Some(" Asha ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(first.is_primary);
        assert_eq!(first.display_name.as_deref(), Some("Asha"));

        let second = create_profile(
            &store,
            "u1",
            ProfileInput {
                name: Some("Dadi".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(!second.is_primary);

        let listed = list_profiles(&store, "u1").await.unwrap();
        assert_eq!(listed.profiles.len(), 2);
        assert_eq!(listed.preferred_profile_id, Some(first.id));

        let err = create_profile(&store, "u1", ProfileInput::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Profile name is required.");
    }

    #[tokio::test]
    async fn test_delete_profile_sequence() {
        let store = MemoryStore::new();
        store.insert_profile(primary_profile("main", "u1", "Asha")).await.unwrap();
        store.insert_profile(profile("dep", "u1", "Dadi")).await.unwrap();
        store
            .insert_health(HealthDoc {
                id: "h".into(),
                profile_id: "dep".into(),
                fields: Map::new(),
            })
            .await;
        store.put_raw_records(RecordKind::Medications, "dep", json!([])).await;

        let objects = Arc::new(MemoryObjectStore::new());
        objects.put_at("dep/bills/a.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00Z").await;
        objects.put_at("main/bills/b.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00Z").await;
        let vault = vault_over(objects.clone());

        let err = delete_profile(&store, &vault, "u1", Some("main")).await.unwrap_err();
        assert_eq!(err.to_string(), "Primary profile cannot be deleted.");
        let err = delete_profile(&store, &vault, "u2", Some("dep")).await.unwrap_err();
        assert_eq!(err.to_string(), PROFILE_DENIED);

        let deleted = delete_profile(&store, &vault, "u1", Some("dep")).await.unwrap();
        assert_eq!(deleted.removed_vault_files, 1);
        assert!(store.profile_by_id("dep").await.unwrap().is_none());
        assert!(store.health_by_profile("dep").await.unwrap().is_none());
        assert_eq!(objects.paths().await, vec!["main/bills/b.pdf".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_stops_at_failed_step() {
        let store = MemoryStore::new();
        store.insert_profile(profile("dep", "u1", "Dadi")).await.unwrap();
        store.fail("delete_activity_for_profile");
        let vault = vault_over(Arc::new(MemoryObjectStore::new()));

        assert!(delete_profile(&store, &vault, "u1", Some("dep")).await.is_err());
        // profile row kept
        assert!(store.profile_by_id("dep").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_account_requires_confirmation() {
        let store = MemoryStore::new();
        let vault = vault_over(Arc::new(MemoryObjectStore::new()));
        for confirmation in [None, Some(""), Some("yes"), Some("DELETE ME")] {
            let err = delete_account(&store, &vault, "u1", confirmation).await.unwrap_err();
            assert_eq!(err.status_code(), hyper::StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_delete_account_removes_everything_owned() {
        use crate::care::family::create_family;
        use crate::care::fixtures::{link, seed_user};
        use crate::db::schemas::{LinkStatus, RememberedDeviceDoc};
        use crate::store::NotificationPatch;

        let store = MemoryStore::new();
        let user = seed_user(&store, "asha@example.com").await;
        let friend = seed_user(&store, "ravi@example.com").await;
        store.insert_profile(primary_profile("main", &user, "Asha")).await.unwrap();
        let mut legacy = profile("dep", "ignored", "Dadi");
        legacy.auth_id = None;
        legacy.user_id = Some(user.clone());
        store.insert_profile(legacy).await.unwrap();
        store.insert_profile(primary_profile("other", &friend, "Ravi")).await.unwrap();
        store
            .insert_health(HealthDoc {
                id: "h".into(),
                profile_id: "dep".into(),
                fields: Map::new(),
            })
            .await;

        let family = create_family(&store, &user, "Sharmas").await.unwrap();
        let mut grouped = link("l1", &user, &friend, LinkStatus::Accepted);
        grouped.family_id = Some(family.id.clone());
        store.insert_link(grouped).await.unwrap();
        store.insert_link(link("l2", "x", "y", LinkStatus::Pending)).await.unwrap();
        store
            .upsert_remembered_device(RememberedDeviceDoc {
                id: "d".into(),
                user_id: user.clone(),
                device_token_hash: "hash".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .upsert_notification_states(
                &user,
                &["n1".to_string()],
                NotificationPatch { read: Some(true), dismissed: None },
            )
            .await
            .unwrap();

        let objects = Arc::new(MemoryObjectStore::new());
        objects.put_at("main/reports/a.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00Z").await;
        objects.put_at("dep/bills/b.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00Z").await;
        objects.put_at("other/bills/c.pdf", Bytes::from_static(b"1"), "2024-01-01T00:00:00Z").await;
        let vault = vault_over(objects.clone());

        let deleted = delete_account(&store, &vault, &user, Some(" delete ")).await.unwrap();
        assert_eq!(deleted.removed_profiles, 2);
        assert_eq!(deleted.removed_vault_files, 2);
        assert_eq!(deleted.mode, "hard");

        assert!(store.profile_by_id("main").await.unwrap().is_none());
        assert!(store.profile_by_id("dep").await.unwrap().is_none());
        assert!(store.profile_by_id("other").await.unwrap().is_some());
        assert!(store.health_by_profile("dep").await.unwrap().is_none());
        assert_eq!(objects.paths().await, vec!["other/bills/c.pdf".to_string()]);

        let links: Vec<String> = store.all_links().await.into_iter().map(|l| l.id).collect();
        assert_eq!(links, vec!["l2".to_string()]);
        assert!(store.family_membership(&user).await.unwrap().is_none());
        assert_eq!(store.family_count().await, 0);
        assert!(store.all_devices().await.is_empty());
        assert!(store
            .notification_states(&user, &["n1".to_string()])
            .await
            .unwrap()
            .is_empty());
        assert!(store.credential_by_id(&user).await.unwrap().is_none());
        assert!(store.credential_by_id(&friend).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_account_keeps_shared_family_and_tolerates_legacy_schema() {
        use crate::care::family::create_family;
        use crate::care::fixtures::seed_user;
        use crate::db::schemas::{FamilyMemberDoc, FamilyRole};

        let store = MemoryStore::new().without_auth_id_column();
        let user = seed_user(&store, "asha@example.com").await;
        let family = create_family(&store, "owner", "Sharmas").await.unwrap();
        store
            .insert_family_member(FamilyMemberDoc {
                id: "m".into(),
                family_id: family.id.clone(),
                user_id: user.clone(),
                role: FamilyRole::Member,
                created_at: String::new(),
            })
            .await
            .unwrap();
        let mut legacy = profile("p1", "ignored", "Asha");
        legacy.auth_id = None;
        legacy.user_id = Some(user.clone());
        store.insert_profile(legacy).await.unwrap();
        let vault = vault_over(Arc::new(MemoryObjectStore::new()));

        delete_account(&store, &vault, &user, Some("DELETE")).await.unwrap();
        assert!(store.profile_by_id("p1").await.unwrap().is_none());
        assert_eq!(store.family_count().await, 1);
        assert!(store.family_membership("owner").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_account_keeps_credential_when_a_step_fails() {
        let store = MemoryStore::new();
        let user = crate::care::fixtures::seed_user(&store, "asha@example.com").await;
        store.insert_profile(primary_profile("main", &user, "Asha")).await.unwrap();
        store.fail("delete_medical_data");
        let vault = vault_over(Arc::new(MemoryObjectStore::new()));

        assert!(delete_account(&store, &vault, &user, Some("DELETE")).await.is_err());
        assert!(store.credential_by_id(&user).await.unwrap().is_some());
        assert!(store.profile_by_id("main").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_own_activity_validation() {
        let store = MemoryStore::new();
        store.insert_profile(primary_profile("p1", "u1", "Asha")).await.unwrap();

        let input = |domain: &str, action: &str, profile: &str| OwnActivity {
            profile_id: Some(profile.into()),
            domain: Some(domain.into()),
            action: Some(action.into()),
            entity: Some(json!({ "id": "m1", "label": "Metformin" })),
            metadata: Some(json!({ "via": "app" })),
        };

        let err = record_own_activity(&store, "u1", input("billing", "add", "p1")).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid domain.");
        let err = record_own_activity(&store, "u1", input("medication", "share", "p1")).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid action.");
        let err = record_own_activity(&store, "u2", input("medication", "add", "p1")).await.unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::FORBIDDEN);

        record_own_activity(&store, "u1", input("medication", "add", "p1")).await.unwrap();
        let feed = own_feed(&store, "u1", Some("p1"), FeedWindow::from_query(None, None)).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].entity_label.as_deref(), Some("Metformin"));
        assert_eq!(feed[0].metadata["via"], "app");
        assert_eq!(feed[0].actor_display_name.as_deref(), Some("Asha"));
    }
}

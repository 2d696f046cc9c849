//! Access policy
//!
//! Two authorization paths exist and are kept separate:
//! - link-scoped: cross-user reads and edits of medical data and vault
//!   files through one care-circle link require the caller to be the
//!   accepted recipient of a `family` link;
//! - group-scoped: family-member details and vault files only require both
//!   users to resolve to the same shared group id, whatever the relationship
//!   kind. Family health additionally needs an accepted link inside it.

use crate::care::relationship::{resolve_group_id, RelationshipKind};
use crate::db::schemas::{LinkDoc, LinkStatus};
use crate::store::CareStore;
use crate::types::{CareError, Result};

pub const LINK_NOT_FOUND: &str = "Care circle link not found.";
pub const MEMBER_DENIED: &str = "Not allowed for this care circle member.";
pub const OWNER_PROFILE_MISSING: &str = "Owner profile is not available.";
pub const FAMILY_MEMBER_DENIED: &str = "Not allowed for this family member.";

/// What the caller wants to do with the shared profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ReadProfile,
    ReadHealth,
    ReadVaultFile,
    ManageVault,
    ManageRecords,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Decide a link-scoped capability. All capabilities share one rule today.
pub fn evaluate_link(user_id: &str, link: &LinkDoc, _capability: Capability) -> Decision {
    let is_recipient = link.recipient_id == user_id;
    let accepted = link.status == LinkStatus::Accepted;
    let family = RelationshipKind::normalize(link.relationship.as_deref()) == RelationshipKind::Family;

    if is_recipient && accepted && family {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// Decide group-scoped access between two resolved group ids
pub fn evaluate_group(viewer_group: Option<&str>, target_group: Option<&str>) -> Decision {
    match (viewer_group, target_group) {
        (Some(viewer), Some(target)) if viewer == target => Decision::Allow,
        _ => Decision::Deny,
    }
}

/// A link the caller may act through, plus the shared profile's owner
#[derive(Debug, Clone)]
pub struct MemberAccess {
    pub link: LinkDoc,
    pub owner_profile_id: String,
    pub owner_user_id: String,
}

/// Load a link and check the caller may use `capability` through it
pub async fn authorize_member(
    store: &dyn CareStore,
    user_id: &str,
    link_id: &str,
    capability: Capability,
) -> Result<MemberAccess> {
    let link = store
        .link_by_id(link_id)
        .await?
        .ok_or_else(|| CareError::NotFound(LINK_NOT_FOUND.into()))?;

    if evaluate_link(user_id, &link, capability) == Decision::Deny {
        return Err(CareError::Forbidden(MEMBER_DENIED.into()));
    }

    let owner_profile_id = link
        .profile_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| CareError::NotFound(OWNER_PROFILE_MISSING.into()))?;

    Ok(MemberAccess {
        owner_user_id: link.requester_id.clone(),
        owner_profile_id,
        link,
    })
}

/// Shared group id of a user, resolved from their links
pub async fn group_of(store: &dyn CareStore, user_id: &str) -> Result<Option<String>> {
    let links = store.links_for_user(user_id).await?;
    Ok(resolve_group_id(user_id, &links))
}

/// Check the viewer and target share a group; returns the group id
pub async fn authorize_group_member(
    store: &dyn CareStore,
    viewer_id: &str,
    target_user_id: &str,
) -> Result<String> {
    let viewer_group = group_of(store, viewer_id).await?;
    let target_group = if target_user_id == viewer_id {
        viewer_group.clone()
    } else {
        group_of(store, target_user_id).await?
    };

    match evaluate_group(viewer_group.as_deref(), target_group.as_deref()) {
        Decision::Allow => viewer_group.ok_or_else(|| CareError::Forbidden(FAMILY_MEMBER_DENIED.into())),
        Decision::Deny => Err(CareError::Forbidden(FAMILY_MEMBER_DENIED.into())),
    }
}

/// Group check for family health: the viewer's group, plus an accepted
/// link between viewer and target inside it unless they are the same user
pub async fn authorize_group_link(
    store: &dyn CareStore,
    viewer_id: &str,
    target_user_id: &str,
) -> Result<String> {
    let links = store.links_for_user(viewer_id).await?;
    let group = resolve_group_id(viewer_id, &links)
        .ok_or_else(|| CareError::Forbidden(FAMILY_MEMBER_DENIED.into()))?;
    if target_user_id == viewer_id {
        return Ok(group);
    }

    let linked = links.iter().any(|l| {
        l.status == LinkStatus::Accepted
            && l.family_id.as_deref() == Some(group.as_str())
            && l.side_of(viewer_id).is_some()
            && l.side_of(target_user_id).is_some()
    });
    if linked {
        Ok(group)
    } else {
        Err(CareError::Forbidden(FAMILY_MEMBER_DENIED.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::fixtures::{family_link, link};
    use crate::store::MemoryStore;

    #[test]
    fn test_family_recipient_allowed() {
        let l = family_link("l", "owner", "viewer", "p");
        assert_eq!(evaluate_link("viewer", &l, Capability::ReadHealth), Decision::Allow);
    }

    #[test]
    fn test_requester_denied() {
        let l = family_link("l", "owner", "viewer", "p");
        assert_eq!(evaluate_link("owner", &l, Capability::ReadHealth), Decision::Deny);
    }

    #[test]
    fn test_pending_denied() {
        let mut l = family_link("l", "owner", "viewer", "p");
        l.status = LinkStatus::Pending;
        assert_eq!(evaluate_link("viewer", &l, Capability::ReadProfile), Decision::Deny);
    }

    #[test]
    fn test_relationship_kind_exact_match() {
        for (raw, expected) in [
            ("Family", Decision::Allow),
            ("family ", Decision::Allow),
            ("FAMILY-MEMBER", Decision::Deny),
            ("family-member", Decision::Deny),
            ("friend", Decision::Deny),
        ] {
            let mut l = family_link("l", "owner", "viewer", "p");
            l.relationship = Some(raw.to_string());
            assert_eq!(
                evaluate_link("viewer", &l, Capability::ReadHealth),
                expected,
                "relationship {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_group_evaluation() {
        assert_eq!(evaluate_group(Some("g"), Some("g")), Decision::Allow);
        assert_eq!(evaluate_group(Some("g"), Some("h")), Decision::Deny);
        assert_eq!(evaluate_group(None, None), Decision::Deny);
        assert_eq!(evaluate_group(Some("g"), None), Decision::Deny);
    }

    #[tokio::test]
    async fn test_authorize_member_errors() {
        let store = MemoryStore::new();
        let err = authorize_member(&store, "viewer", "nope", Capability::ReadHealth)
            .await
            .unwrap_err();
        assert!(matches!(err, CareError::NotFound(ref m) if m == LINK_NOT_FOUND));

        let mut no_profile = family_link("l1", "owner", "viewer", "p");
        no_profile.profile_id = None;
        store.insert_link(no_profile).await.unwrap();
        let err = authorize_member(&store, "viewer", "l1", Capability::ReadHealth)
            .await
            .unwrap_err();
        assert!(matches!(err, CareError::NotFound(ref m) if m == OWNER_PROFILE_MISSING));

        store.insert_link(link("l2", "owner", "viewer", LinkStatus::Accepted)).await.unwrap();
        let err = authorize_member(&store, "viewer", "l2", Capability::ReadHealth)
            .await
            .unwrap_err();
        assert!(matches!(err, CareError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_group_scope_ignores_relationship_kind() {
        let store = MemoryStore::new();
        // friend-kind link: medical reads denied, group vault access allowed
        let mut l = link("l", "owner", "viewer", LinkStatus::Accepted);
        l.family_id = Some("fam".into());
        l.profile_id = Some("p".into());
        store.insert_link(l).await.unwrap();

        assert!(authorize_member(&store, "viewer", "l", Capability::ReadVaultFile)
            .await
            .is_err());
        assert_eq!(
            authorize_group_member(&store, "viewer", "owner").await.unwrap(),
            "fam"
        );
    }

    #[tokio::test]
    async fn test_group_scope_denies_strangers() {
        let store = MemoryStore::new();
        let mut a = link("a", "u1", "u2", LinkStatus::Accepted);
        a.family_id = Some("g1".into());
        let mut b = link("b", "u3", "u4", LinkStatus::Accepted);
        b.family_id = Some("g2".into());
        store.insert_link(a).await.unwrap();
        store.insert_link(b).await.unwrap();

        let err = authorize_group_member(&store, "u1", "u3").await.unwrap_err();
        assert!(matches!(err, CareError::Forbidden(ref m) if m == FAMILY_MEMBER_DENIED));
    }

    #[tokio::test]
    async fn test_group_link_needs_accepted_link_in_group() {
        let store = MemoryStore::new();
        let mut a = link("a", "u1", "u2", LinkStatus::Accepted);
        a.family_id = Some("g1".into());
        let mut b = link("b", "u1", "u3", LinkStatus::Pending);
        b.family_id = Some("g1".into());
        store.insert_link(a).await.unwrap();
        store.insert_link(b).await.unwrap();

        assert_eq!(authorize_group_link(&store, "u1", "u2").await.unwrap(), "g1");
        assert_eq!(authorize_group_link(&store, "u1", "u1").await.unwrap(), "g1");
        // same group, but only a pending link
        assert!(authorize_group_link(&store, "u1", "u3").await.is_err());
        assert!(authorize_group_link(&store, "loner", "loner").await.is_err());
    }
}

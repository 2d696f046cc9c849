//! Builders shared by the care tests

use crate::db::schemas::{CredentialDoc, LinkDoc, LinkStatus, ProfileDoc};
use crate::store::{CareStore, MemoryStore};

pub fn profile(id: &str, owner: &str, display_name: &str) -> ProfileDoc {
    ProfileDoc {
        id: id.to_string(),
        auth_id: Some(owner.to_string()),
        display_name: Some(display_name.to_string()),
        created_at: Some("2024-01-01T00:00:00.000Z".to_string()),
        ..Default::default()
    }
}

pub fn primary_profile(id: &str, owner: &str, display_name: &str) -> ProfileDoc {
    ProfileDoc {
        is_primary: true,
        ..profile(id, owner, display_name)
    }
}

pub fn link(id: &str, requester: &str, recipient: &str, status: LinkStatus) -> LinkDoc {
    LinkDoc {
        id: id.to_string(),
        requester_id: requester.to_string(),
        recipient_id: recipient.to_string(),
        status,
        relationship: Some("friend".to_string()),
        ..Default::default()
    }
}

/// Accepted family link sharing `profile_id` from requester to recipient
pub fn family_link(id: &str, requester: &str, recipient: &str, profile_id: &str) -> LinkDoc {
    LinkDoc {
        relationship: Some("family".to_string()),
        profile_id: Some(profile_id.to_string()),
        ..link(id, requester, recipient, LinkStatus::Accepted)
    }
}

/// Insert a credential and return its user id
pub async fn seed_user(store: &MemoryStore, email: &str) -> String {
    store
        .insert_credential(CredentialDoc::new(Some(email.to_string()), None, None))
        .await
        .map(|c| c.id)
        .unwrap_or_default()
}

//! Vault access through a care-circle link
//!
//! Reads need [`Capability::ReadVaultFile`], writes [`Capability::ManageVault`].
//! Every write lands in the shared profile's activity log.

use serde::Serialize;

use crate::care::activity::{log_activity, ActivityAction, ActivityDomain, ActivityEvent};
use crate::care::policy::{authorize_member, Capability, MemberAccess};
use crate::store::CareStore;
use crate::types::Result;
use crate::vault::service::StoredFile;
use crate::vault::{ListOptions, UploadRequest, Vault, VaultFile, VaultFolder};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameOutcome {
    pub from_name: String,
    pub to_name: String,
    pub folder: VaultFolder,
}

fn vault_event(
    access: &MemberAccess,
    user_id: &str,
    actor_profile_id: Option<&str>,
    action: ActivityAction,
    folder: VaultFolder,
) -> ActivityEvent {
    ActivityEvent::new(access.owner_profile_id.clone(), user_id, ActivityDomain::Vault, action)
        .actor_profile(actor_profile_id)
        .meta("link_id", access.link.id.clone())
        .meta("folder", folder.as_str())
}

pub async fn list(
    store: &dyn CareStore,
    vault: &Vault,
    user_id: &str,
    link_id: &str,
    options: &ListOptions,
) -> Result<Vec<VaultFile>> {
    let access = authorize_member(store, user_id, link_id, Capability::ReadVaultFile).await?;
    vault.list(&access.owner_profile_id, options).await
}

pub async fn signed_url(
    store: &dyn CareStore,
    vault: &Vault,
    user_id: &str,
    link_id: &str,
    folder: VaultFolder,
    name: &str,
) -> Result<String> {
    let access = authorize_member(store, user_id, link_id, Capability::ReadVaultFile).await?;
    vault.signed_url(&access.owner_profile_id, folder, name)
}

pub async fn upload(
    store: &dyn CareStore,
    vault: &Vault,
    user_id: &str,
    link_id: &str,
    upload: UploadRequest,
    actor_profile_id: Option<&str>,
) -> Result<StoredFile> {
    let access = authorize_member(store, user_id, link_id, Capability::ManageVault).await?;
    let stored = vault.upload(&access.owner_profile_id, upload).await?;

    log_activity(
        store,
        vault_event(&access, user_id, actor_profile_id, ActivityAction::Upload, stored.folder)
            .entity(stored.path.clone(), stored.name.clone())
            .meta("fileName", stored.name.clone()),
    )
    .await;

    Ok(stored)
}

#[allow(clippy::too_many_arguments)]
pub async fn rename(
    store: &dyn CareStore,
    vault: &Vault,
    user_id: &str,
    link_id: &str,
    folder: VaultFolder,
    current: &str,
    next: &str,
    actor_profile_id: Option<&str>,
) -> Result<RenameOutcome> {
    let access = authorize_member(store, user_id, link_id, Capability::ManageVault).await?;
    let (_, to) = vault.rename(&access.owner_profile_id, folder, current, next).await?;
    let (from_name, to_name) = (current.trim().to_string(), next.trim().to_string());

    log_activity(
        store,
        vault_event(&access, user_id, actor_profile_id, ActivityAction::Rename, folder)
            .entity(to, to_name.clone())
            .meta("fromName", from_name.clone())
            .meta("toName", to_name.clone()),
    )
    .await;

    Ok(RenameOutcome {
        from_name,
        to_name,
        folder,
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn delete(
    store: &dyn CareStore,
    vault: &Vault,
    user_id: &str,
    link_id: &str,
    folder: VaultFolder,
    name: &str,
    actor_profile_id: Option<&str>,
) -> Result<()> {
    let access = authorize_member(store, user_id, link_id, Capability::ManageVault).await?;
    let path = vault.delete(&access.owner_profile_id, folder, name).await?;

    log_activity(
        store,
        vault_event(&access, user_id, actor_profile_id, ActivityAction::Delete, folder)
            .entity(path, name.trim())
            .meta("fileName", name.trim()),
    )
    .await;

    Ok(())
}

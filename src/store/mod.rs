//! Data access seam for CareCircle
//!
//! Every read and write of the relational data model goes through
//! [`CareStore`]. Production runs on [`MongoCareStore`]; tests and
//! database-less dev mode run on [`MemoryStore`].

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoCareStore;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::db::schemas::{
    ActivityLogDoc, CredentialDoc, FamilyDoc, FamilyMemberDoc, HealthDoc, LinkDoc, LinkSide,
    LinkStatus, NotificationStateDoc, OwnerColumn, ProfileDoc, RecordKind, RecordListDoc,
    RememberedDeviceDoc,
};
use crate::types::Result;

/// Requested change to a notification state.
///
/// `Some(true)` stamps the current time, `Some(false)` clears the field and
/// `None` leaves it untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationPatch {
    pub read: Option<bool>,
    pub dismissed: Option<bool>,
}

impl NotificationPatch {
    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.dismissed.is_none()
    }
}

/// Query over the activity log
#[derive(Debug, Clone)]
pub struct ActivityQuery {
    pub profile_ids: Vec<String>,
    pub source: String,
    /// Inclusive lower bound on `created_at`
    pub since: String,
    pub limit: usize,
}

#[async_trait]
pub trait CareStore: Send + Sync {
    /// Backend name for logs and readiness output
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    // Credentials

    async fn insert_credential(&self, credential: CredentialDoc) -> Result<CredentialDoc>;
    async fn credential_by_id(&self, id: &str) -> Result<Option<CredentialDoc>>;
    async fn credential_by_email(&self, email: &str) -> Result<Option<CredentialDoc>>;
    async fn credential_by_phone(&self, phones: &[String]) -> Result<Option<CredentialDoc>>;
    async fn credentials_by_ids(&self, ids: &[String]) -> Result<Vec<CredentialDoc>>;
    async fn replace_credential(&self, credential: &CredentialDoc) -> Result<()>;
    async fn delete_credential(&self, id: &str) -> Result<u64>;

    // Remembered devices

    /// Insert or refresh the device row keyed by its token hash
    async fn upsert_remembered_device(&self, device: RememberedDeviceDoc) -> Result<()>;
    async fn remembered_device(&self, token_hash: &str) -> Result<Option<RememberedDeviceDoc>>;

    /// Swap a device's token hash and stamp `last_used_at`; returns the row
    /// under its new hash, or `None` when `token_hash` matched nothing
    async fn rotate_remembered_device(
        &self,
        token_hash: &str,
        next_hash: &str,
    ) -> Result<Option<RememberedDeviceDoc>>;
    async fn touch_remembered_device(&self, token_hash: &str) -> Result<u64>;
    async fn delete_remembered_device(&self, token_hash: &str) -> Result<u64>;
    async fn delete_remembered_devices_for_user(&self, user_id: &str) -> Result<u64>;

    // Profiles

    async fn insert_profile(&self, profile: ProfileDoc) -> Result<ProfileDoc>;
    async fn profile_by_id(&self, id: &str) -> Result<Option<ProfileDoc>>;
    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileDoc>>;

    /// Profiles whose owner column equals `owner_id`.
    ///
    /// Fails with `CareError::MissingField` when the column does not exist.
    async fn profiles_by_owner(&self, column: OwnerColumn, owner_id: &str) -> Result<Vec<ProfileDoc>>;
    async fn profiles_by_owners(
        &self,
        column: OwnerColumn,
        owner_ids: &[String],
    ) -> Result<Vec<ProfileDoc>>;
    async fn profiles_by_phone(&self, phones: &[String]) -> Result<Vec<ProfileDoc>>;
    async fn delete_profile(&self, id: &str) -> Result<u64>;

    // Links

    async fn insert_link(&self, link: LinkDoc) -> Result<LinkDoc>;
    async fn link_by_id(&self, id: &str) -> Result<Option<LinkDoc>>;

    /// Links where the user is requester or recipient, newest first
    async fn links_for_user(&self, user_id: &str) -> Result<Vec<LinkDoc>>;
    async fn links_between(
        &self,
        requester_id: &str,
        recipient_id: &str,
        statuses: &[LinkStatus],
    ) -> Result<Vec<LinkDoc>>;

    /// Move every `from` link of the pair to `to`, returning the count
    async fn set_status_between(
        &self,
        requester_id: &str,
        recipient_id: &str,
        from: LinkStatus,
        to: LinkStatus,
    ) -> Result<u64>;

    /// Set the relationship kind of every `status` link of the pair
    async fn set_relationship_between(
        &self,
        requester_id: &str,
        recipient_id: &str,
        status: LinkStatus,
        relationship: &str,
    ) -> Result<u64>;
    async fn set_link_relation(
        &self,
        link_id: &str,
        side: LinkSide,
        relation: Option<String>,
    ) -> Result<u64>;
    async fn delete_links_in_family(&self, family_id: &str) -> Result<u64>;

    /// Delete every link where the user is requester or recipient
    async fn delete_links_for_user(&self, user_id: &str) -> Result<u64>;

    // Families

    async fn insert_family(&self, family: FamilyDoc) -> Result<FamilyDoc>;
    async fn insert_family_member(&self, member: FamilyMemberDoc) -> Result<FamilyMemberDoc>;
    async fn family_membership(&self, user_id: &str) -> Result<Option<FamilyMemberDoc>>;
    async fn delete_family_join_requests(&self, family_id: &str) -> Result<u64>;
    async fn delete_family_members(&self, family_id: &str) -> Result<u64>;
    async fn delete_family(&self, family_id: &str) -> Result<u64>;
    async fn family_member_count(&self, family_id: &str) -> Result<u64>;
    async fn delete_family_membership(&self, user_id: &str) -> Result<u64>;
    async fn delete_join_requests_for_user(&self, user_id: &str) -> Result<u64>;

    // Medical data

    async fn health_by_profile(&self, profile_id: &str) -> Result<Option<HealthDoc>>;

    /// Replace the given health fields of a profile, creating the row if needed
    async fn upsert_health(
        &self,
        profile_id: &str,
        user_id: &str,
        fields: Map<String, Value>,
    ) -> Result<()>;
    async fn records(&self, kind: RecordKind, profile_id: &str) -> Result<Option<RecordListDoc>>;
    async fn save_records(
        &self,
        kind: RecordKind,
        profile_id: &str,
        user_id: Option<&str>,
        data: Value,
    ) -> Result<()>;
    async fn delete_medical_data(&self, profile_id: &str) -> Result<()>;

    // Activity log

    async fn insert_activity(&self, entry: ActivityLogDoc) -> Result<()>;

    /// Entries matching the query, newest first with `id` as tie-break
    async fn activity(&self, query: &ActivityQuery) -> Result<Vec<ActivityLogDoc>>;
    async fn delete_activity_for_profile(&self, profile_id: &str) -> Result<u64>;

    // Notification states

    async fn notification_states(
        &self,
        user_id: &str,
        notification_ids: &[String],
    ) -> Result<Vec<NotificationStateDoc>>;
    async fn upsert_notification_states(
        &self,
        user_id: &str,
        notification_ids: &[String],
        patch: NotificationPatch,
    ) -> Result<()>;
    async fn delete_notification_states(&self, user_id: &str) -> Result<u64>;
}

//! In-memory store
//!
//! Backs tests and dev mode when MongoDB is unreachable. Supports
//! simulating a legacy schema without `profiles.auth_id` and injecting
//! failures into named operations.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

use crate::db::mongo::Timestamped;
use crate::db::schemas::{
    ActivityLogDoc, CredentialDoc, FamilyDoc, FamilyJoinRequestDoc, FamilyMemberDoc, HealthDoc,
    LinkDoc, LinkSide, LinkStatus, NotificationStateDoc, OwnerColumn, ProfileDoc, RecordKind,
    RecordListDoc, RememberedDeviceDoc,
};
use crate::store::{ActivityQuery, CareStore, NotificationPatch};
use crate::types::{new_id, now_iso, CareError, Result};

#[derive(Default)]
struct Tables {
    credentials: Vec<CredentialDoc>,
    profiles: Vec<ProfileDoc>,
    links: Vec<LinkDoc>,
    families: Vec<FamilyDoc>,
    family_members: Vec<FamilyMemberDoc>,
    join_requests: Vec<FamilyJoinRequestDoc>,
    health: HashMap<String, HealthDoc>,
    records: HashMap<(RecordKind, String), RecordListDoc>,
    activity: Vec<ActivityLogDoc>,
    notifications: Vec<NotificationStateDoc>,
    devices: Vec<RememberedDeviceDoc>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    legacy_profiles: AtomicBool,
    failing: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a deployment whose `profiles` table lacks `auth_id`
    pub fn without_auth_id_column(self) -> Self {
        self.legacy_profiles.store(true, Ordering::SeqCst);
        self
    }

    /// Make the named operation fail with a database error
    pub fn fail(&self, operation: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation.to_string());
        }
    }

    fn check(&self, operation: &str) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| CareError::Internal("failure set poisoned".into()))?;
        if failing.contains(operation) {
            return Err(CareError::Database(format!("simulated failure: {}", operation)));
        }
        Ok(())
    }

    pub async fn insert_join_request(&self, mut request: FamilyJoinRequestDoc) {
        request.stamp(&now_iso());
        self.tables.write().await.join_requests.push(request);
    }

    pub async fn all_links(&self) -> Vec<LinkDoc> {
        self.tables.read().await.links.clone()
    }

    pub async fn all_activity(&self) -> Vec<ActivityLogDoc> {
        self.tables.read().await.activity.clone()
    }

    pub async fn family_count(&self) -> usize {
        self.tables.read().await.families.len()
    }

    pub async fn join_request_count(&self) -> usize {
        self.tables.read().await.join_requests.len()
    }

    pub async fn all_devices(&self) -> Vec<RememberedDeviceDoc> {
        self.tables.read().await.devices.clone()
    }

    pub async fn credential_count(&self) -> usize {
        self.tables.read().await.credentials.len()
    }

    pub async fn insert_health(&self, health: HealthDoc) {
        self.tables
            .write()
            .await
            .health
            .insert(health.profile_id.clone(), health);
    }

    /// Store a raw record payload as-is (any of the accepted shapes)
    pub async fn put_raw_records(&self, kind: RecordKind, profile_id: &str, data: Value) {
        let doc = RecordListDoc {
            id: new_id(),
            profile_id: profile_id.to_string(),
            user_id: None,
            data,
            updated_at: now_iso(),
        };
        self.tables
            .write()
            .await
            .records
            .insert((kind, profile_id.to_string()), doc);
    }
}

fn is_pair(link: &LinkDoc, requester_id: &str, recipient_id: &str) -> bool {
    link.requester_id == requester_id && link.recipient_id == recipient_id
}

#[async_trait]
impl CareStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.check("ping")
    }

    async fn insert_credential(&self, mut credential: CredentialDoc) -> Result<CredentialDoc> {
        self.check("insert_credential")?;
        let mut tables = self.tables.write().await;
        if let Some(email) = &credential.email {
            if tables.credentials.iter().any(|c| c.email.as_ref() == Some(email)) {
                return Err(CareError::Conflict("Record already exists.".into()));
            }
        }
        credential.stamp(&now_iso());
        tables.credentials.push(credential.clone());
        Ok(credential)
    }

    async fn credential_by_id(&self, id: &str) -> Result<Option<CredentialDoc>> {
        self.check("credential_by_id")?;
        let tables = self.tables.read().await;
        Ok(tables.credentials.iter().find(|c| c.id == id).cloned())
    }

    async fn credential_by_email(&self, email: &str) -> Result<Option<CredentialDoc>> {
        let tables = self.tables.read().await;
        Ok(tables
            .credentials
            .iter()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn credential_by_phone(&self, phones: &[String]) -> Result<Option<CredentialDoc>> {
        let tables = self.tables.read().await;
        Ok(tables
            .credentials
            .iter()
            .find(|c| c.phone.as_ref().is_some_and(|p| phones.contains(p)))
            .cloned())
    }

    async fn credentials_by_ids(&self, ids: &[String]) -> Result<Vec<CredentialDoc>> {
        self.check("credentials_by_ids")?;
        let tables = self.tables.read().await;
        Ok(tables
            .credentials
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn replace_credential(&self, credential: &CredentialDoc) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .credentials
            .iter_mut()
            .find(|c| c.id == credential.id)
            .ok_or_else(|| CareError::NotFound("Credential not found.".into()))?;
        *slot = credential.clone();
        slot.updated_at = now_iso();
        Ok(())
    }

    async fn delete_credential(&self, id: &str) -> Result<u64> {
        self.check("delete_credential")?;
        let mut tables = self.tables.write().await;
        let before = tables.credentials.len();
        tables.credentials.retain(|c| c.id != id);
        Ok((before - tables.credentials.len()) as u64)
    }

    async fn upsert_remembered_device(&self, mut device: RememberedDeviceDoc) -> Result<()> {
        self.check("upsert_remembered_device")?;
        let now = now_iso();
        let mut tables = self.tables.write().await;
        match tables
            .devices
            .iter_mut()
            .find(|d| d.device_token_hash == device.device_token_hash)
        {
            Some(existing) => {
                existing.user_id = device.user_id;
                existing.label = device.label;
                existing.stamp(&now);
            }
            None => {
                device.stamp(&now);
                tables.devices.push(device);
            }
        }
        Ok(())
    }

    async fn remembered_device(&self, token_hash: &str) -> Result<Option<RememberedDeviceDoc>> {
        self.check("remembered_device")?;
        let tables = self.tables.read().await;
        Ok(tables
            .devices
            .iter()
            .find(|d| d.device_token_hash == token_hash)
            .cloned())
    }

    async fn rotate_remembered_device(
        &self,
        token_hash: &str,
        next_hash: &str,
    ) -> Result<Option<RememberedDeviceDoc>> {
        self.check("rotate_remembered_device")?;
        let now = now_iso();
        let mut tables = self.tables.write().await;
        let Some(device) = tables
            .devices
            .iter_mut()
            .find(|d| d.device_token_hash == token_hash)
        else {
            return Ok(None);
        };
        device.device_token_hash = next_hash.to_string();
        device.stamp(&now);
        Ok(Some(device.clone()))
    }

    async fn touch_remembered_device(&self, token_hash: &str) -> Result<u64> {
        let now = now_iso();
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for device in tables
            .devices
            .iter_mut()
            .filter(|d| d.device_token_hash == token_hash)
        {
            device.stamp(&now);
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete_remembered_device(&self, token_hash: &str) -> Result<u64> {
        self.check("delete_remembered_device")?;
        let mut tables = self.tables.write().await;
        let before = tables.devices.len();
        tables.devices.retain(|d| d.device_token_hash != token_hash);
        Ok((before - tables.devices.len()) as u64)
    }

    async fn delete_remembered_devices_for_user(&self, user_id: &str) -> Result<u64> {
        self.check("delete_remembered_devices_for_user")?;
        let mut tables = self.tables.write().await;
        let before = tables.devices.len();
        tables.devices.retain(|d| d.user_id != user_id);
        Ok((before - tables.devices.len()) as u64)
    }

    async fn insert_profile(&self, mut profile: ProfileDoc) -> Result<ProfileDoc> {
        self.check("insert_profile")?;
        profile.stamp(&now_iso());
        self.tables.write().await.profiles.push(profile.clone());
        Ok(profile)
    }

    async fn profile_by_id(&self, id: &str) -> Result<Option<ProfileDoc>> {
        self.check("profile_by_id")?;
        let tables = self.tables.read().await;
        Ok(tables.profiles.iter().find(|p| p.id == id).cloned())
    }

    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileDoc>> {
        self.check("profiles_by_ids")?;
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn profiles_by_owner(&self, column: OwnerColumn, owner_id: &str) -> Result<Vec<ProfileDoc>> {
        self.profiles_by_owners(column, &[owner_id.to_string()]).await
    }

    async fn profiles_by_owners(
        &self,
        column: OwnerColumn,
        owner_ids: &[String],
    ) -> Result<Vec<ProfileDoc>> {
        self.check("profiles_by_owner")?;
        if column == OwnerColumn::AuthId && self.legacy_profiles.load(Ordering::SeqCst) {
            return Err(CareError::MissingField(column.field().to_string()));
        }
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .iter()
            .filter(|p| {
                p.owner_value(column)
                    .is_some_and(|owner| owner_ids.iter().any(|id| id == owner))
            })
            .cloned()
            .collect())
    }

    async fn profiles_by_phone(&self, phones: &[String]) -> Result<Vec<ProfileDoc>> {
        self.check("profiles_by_phone")?;
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .iter()
            .filter(|p| p.phone.as_ref().is_some_and(|phone| phones.contains(phone)))
            .cloned()
            .collect())
    }

    async fn delete_profile(&self, id: &str) -> Result<u64> {
        self.check("delete_profile")?;
        let mut tables = self.tables.write().await;
        let before = tables.profiles.len();
        tables.profiles.retain(|p| p.id != id);
        Ok((before - tables.profiles.len()) as u64)
    }

    async fn insert_link(&self, mut link: LinkDoc) -> Result<LinkDoc> {
        self.check("insert_link")?;
        link.stamp(&now_iso());
        self.tables.write().await.links.push(link.clone());
        Ok(link)
    }

    async fn link_by_id(&self, id: &str) -> Result<Option<LinkDoc>> {
        self.check("link_by_id")?;
        let tables = self.tables.read().await;
        Ok(tables.links.iter().find(|l| l.id == id).cloned())
    }

    async fn links_for_user(&self, user_id: &str) -> Result<Vec<LinkDoc>> {
        self.check("links_for_user")?;
        let tables = self.tables.read().await;
        let mut links: Vec<LinkDoc> = tables
            .links
            .iter()
            .filter(|l| l.requester_id == user_id || l.recipient_id == user_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(links)
    }

    async fn links_between(
        &self,
        requester_id: &str,
        recipient_id: &str,
        statuses: &[LinkStatus],
    ) -> Result<Vec<LinkDoc>> {
        self.check("links_between")?;
        let tables = self.tables.read().await;
        Ok(tables
            .links
            .iter()
            .filter(|l| is_pair(l, requester_id, recipient_id) && statuses.contains(&l.status))
            .cloned()
            .collect())
    }

    async fn set_status_between(
        &self,
        requester_id: &str,
        recipient_id: &str,
        from: LinkStatus,
        to: LinkStatus,
    ) -> Result<u64> {
        self.check("set_status_between")?;
        let now = now_iso();
        let mut tables = self.tables.write().await;
        let mut updated = 0;
        for link in tables
            .links
            .iter_mut()
            .filter(|l| is_pair(l, requester_id, recipient_id) && l.status == from)
        {
            link.status = to;
            link.updated_at = now.clone();
            updated += 1;
        }
        Ok(updated)
    }

    async fn set_relationship_between(
        &self,
        requester_id: &str,
        recipient_id: &str,
        status: LinkStatus,
        relationship: &str,
    ) -> Result<u64> {
        self.check("set_relationship_between")?;
        let now = now_iso();
        let mut tables = self.tables.write().await;
        let mut updated = 0;
        for link in tables
            .links
            .iter_mut()
            .filter(|l| is_pair(l, requester_id, recipient_id) && l.status == status)
        {
            link.relationship = Some(relationship.to_string());
            link.updated_at = now.clone();
            updated += 1;
        }
        Ok(updated)
    }

    async fn set_link_relation(
        &self,
        link_id: &str,
        side: LinkSide,
        relation: Option<String>,
    ) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let Some(link) = tables.links.iter_mut().find(|l| l.id == link_id) else {
            return Ok(0);
        };
        match side {
            LinkSide::Requester => link.requester_relation = relation,
            LinkSide::Recipient => link.recipient_relation = relation,
        }
        link.updated_at = now_iso();
        Ok(1)
    }

    async fn delete_links_in_family(&self, family_id: &str) -> Result<u64> {
        self.check("delete_links_in_family")?;
        let mut tables = self.tables.write().await;
        let before = tables.links.len();
        tables
            .links
            .retain(|l| l.family_id.as_deref() != Some(family_id));
        Ok((before - tables.links.len()) as u64)
    }

    async fn delete_links_for_user(&self, user_id: &str) -> Result<u64> {
        self.check("delete_links_for_user")?;
        let mut tables = self.tables.write().await;
        let before = tables.links.len();
        tables
            .links
            .retain(|l| l.requester_id != user_id && l.recipient_id != user_id);
        Ok((before - tables.links.len()) as u64)
    }

    async fn insert_family(&self, mut family: FamilyDoc) -> Result<FamilyDoc> {
        family.stamp(&now_iso());
        self.tables.write().await.families.push(family.clone());
        Ok(family)
    }

    async fn insert_family_member(&self, mut member: FamilyMemberDoc) -> Result<FamilyMemberDoc> {
        let mut tables = self.tables.write().await;
        if tables.family_members.iter().any(|m| m.user_id == member.user_id) {
            return Err(CareError::Conflict("Record already exists.".into()));
        }
        member.stamp(&now_iso());
        tables.family_members.push(member.clone());
        Ok(member)
    }

    async fn family_membership(&self, user_id: &str) -> Result<Option<FamilyMemberDoc>> {
        self.check("family_membership")?;
        let tables = self.tables.read().await;
        Ok(tables
            .family_members
            .iter()
            .find(|m| m.user_id == user_id)
            .cloned())
    }

    async fn delete_family_join_requests(&self, family_id: &str) -> Result<u64> {
        self.check("delete_family_join_requests")?;
        let mut tables = self.tables.write().await;
        let before = tables.join_requests.len();
        tables.join_requests.retain(|r| r.family_id != family_id);
        Ok((before - tables.join_requests.len()) as u64)
    }

    async fn delete_family_members(&self, family_id: &str) -> Result<u64> {
        self.check("delete_family_members")?;
        let mut tables = self.tables.write().await;
        let before = tables.family_members.len();
        tables.family_members.retain(|m| m.family_id != family_id);
        Ok((before - tables.family_members.len()) as u64)
    }

    async fn delete_family(&self, family_id: &str) -> Result<u64> {
        self.check("delete_family")?;
        let mut tables = self.tables.write().await;
        let before = tables.families.len();
        tables.families.retain(|f| f.id != family_id);
        Ok((before - tables.families.len()) as u64)
    }

    async fn family_member_count(&self, family_id: &str) -> Result<u64> {
        self.check("family_member_count")?;
        let tables = self.tables.read().await;
        Ok(tables
            .family_members
            .iter()
            .filter(|m| m.family_id == family_id)
            .count() as u64)
    }

    async fn delete_family_membership(&self, user_id: &str) -> Result<u64> {
        self.check("delete_family_membership")?;
        let mut tables = self.tables.write().await;
        let before = tables.family_members.len();
        tables.family_members.retain(|m| m.user_id != user_id);
        Ok((before - tables.family_members.len()) as u64)
    }

    async fn delete_join_requests_for_user(&self, user_id: &str) -> Result<u64> {
        self.check("delete_join_requests_for_user")?;
        let mut tables = self.tables.write().await;
        let before = tables.join_requests.len();
        tables.join_requests.retain(|r| r.user_id != user_id);
        Ok((before - tables.join_requests.len()) as u64)
    }

    async fn health_by_profile(&self, profile_id: &str) -> Result<Option<HealthDoc>> {
        self.check("health_by_profile")?;
        Ok(self.tables.read().await.health.get(profile_id).cloned())
    }

    async fn upsert_health(
        &self,
        profile_id: &str,
        user_id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        self.check("upsert_health")?;
        let mut tables = self.tables.write().await;
        let row = tables
            .health
            .entry(profile_id.to_string())
            .or_insert_with(|| HealthDoc {
                id: new_id(),
                profile_id: profile_id.to_string(),
                fields: Map::new(),
            });
        row.fields.extend(fields);
        row.fields
            .insert("user_id".to_string(), Value::String(user_id.to_string()));
        row.fields
            .insert("updated_at".to_string(), Value::String(now_iso()));
        Ok(())
    }

    async fn records(&self, kind: RecordKind, profile_id: &str) -> Result<Option<RecordListDoc>> {
        self.check(&format!("records:{}", kind.wrapper_key()))?;
        let tables = self.tables.read().await;
        Ok(tables.records.get(&(kind, profile_id.to_string())).cloned())
    }

    async fn save_records(
        &self,
        kind: RecordKind,
        profile_id: &str,
        user_id: Option<&str>,
        data: Value,
    ) -> Result<()> {
        self.check(&format!("save_records:{}", kind.wrapper_key()))?;
        let mut tables = self.tables.write().await;
        let entry = tables
            .records
            .entry((kind, profile_id.to_string()))
            .or_insert_with(|| RecordListDoc {
                id: new_id(),
                profile_id: profile_id.to_string(),
                ..Default::default()
            });
        if entry.user_id.is_none() {
            entry.user_id = user_id.map(str::to_string);
        }
        entry.data = data;
        entry.stamp(&now_iso());
        Ok(())
    }

    async fn delete_medical_data(&self, profile_id: &str) -> Result<()> {
        self.check("delete_medical_data")?;
        let mut tables = self.tables.write().await;
        tables.health.remove(profile_id);
        tables.records.retain(|(_, pid), _| pid != profile_id);
        Ok(())
    }

    async fn insert_activity(&self, mut entry: ActivityLogDoc) -> Result<()> {
        self.check("insert_activity")?;
        entry.stamp(&now_iso());
        self.tables.write().await.activity.push(entry);
        Ok(())
    }

    async fn activity(&self, query: &ActivityQuery) -> Result<Vec<ActivityLogDoc>> {
        self.check("activity")?;
        let tables = self.tables.read().await;
        let mut rows: Vec<ActivityLogDoc> = tables
            .activity
            .iter()
            .filter(|a| {
                query.profile_ids.contains(&a.profile_id)
                    && a.source == query.source
                    && a.created_at.as_str() >= query.since.as_str()
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn delete_activity_for_profile(&self, profile_id: &str) -> Result<u64> {
        self.check("delete_activity_for_profile")?;
        let mut tables = self.tables.write().await;
        let before = tables.activity.len();
        tables.activity.retain(|a| a.profile_id != profile_id);
        Ok((before - tables.activity.len()) as u64)
    }

    async fn notification_states(
        &self,
        user_id: &str,
        notification_ids: &[String],
    ) -> Result<Vec<NotificationStateDoc>> {
        self.check("notification_states")?;
        let tables = self.tables.read().await;
        Ok(tables
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && notification_ids.contains(&n.notification_id))
            .cloned()
            .collect())
    }

    async fn upsert_notification_states(
        &self,
        user_id: &str,
        notification_ids: &[String],
        patch: NotificationPatch,
    ) -> Result<()> {
        self.check("upsert_notification_states")?;
        let now = now_iso();
        let stamp = |flag: bool| if flag { Some(now.clone()) } else { None };
        let mut tables = self.tables.write().await;

        for notification_id in notification_ids {
            let position = tables
                .notifications
                .iter()
                .position(|n| n.user_id == user_id && &n.notification_id == notification_id);
            let row = match position {
                Some(index) => &mut tables.notifications[index],
                None => {
                    tables.notifications.push(NotificationStateDoc {
                        user_id: user_id.to_string(),
                        notification_id: notification_id.clone(),
                        ..Default::default()
                    });
                    let last = tables.notifications.len() - 1;
                    &mut tables.notifications[last]
                }
            };
            if let Some(read) = patch.read {
                row.read_at = stamp(read);
            }
            if let Some(dismissed) = patch.dismissed {
                row.dismissed_at = stamp(dismissed);
            }
            row.stamp(&now);
        }
        Ok(())
    }

    async fn delete_notification_states(&self, user_id: &str) -> Result<u64> {
        self.check("delete_notification_states")?;
        let mut tables = self.tables.write().await;
        let before = tables.notifications.len();
        tables.notifications.retain(|n| n.user_id != user_id);
        Ok((before - tables.notifications.len()) as u64)
    }
}

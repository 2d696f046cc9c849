//! MongoDB-backed store

use async_trait::async_trait;
use bson::{doc, Bson};
use serde_json::{Map, Value};

use crate::db::schemas::{
    ActivityLogDoc, CredentialDoc, FamilyDoc, FamilyJoinRequestDoc, FamilyMemberDoc, HealthDoc,
    LinkDoc, LinkSide, LinkStatus, NotificationStateDoc, OwnerColumn, ProfileDoc, RecordKind,
    RecordListDoc, RememberedDeviceDoc, ACTIVITY_LOG_COLLECTION, APPOINTMENT_COLLECTION,
    CREDENTIAL_COLLECTION, FAMILY_COLLECTION, FAMILY_JOIN_REQUEST_COLLECTION,
    FAMILY_MEMBER_COLLECTION, HEALTH_COLLECTION, LINK_COLLECTION, MEDICATION_COLLECTION,
    NOTIFICATION_STATE_COLLECTION, PROFILE_COLLECTION, REMEMBERED_DEVICE_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::store::{ActivityQuery, CareStore, NotificationPatch};
use crate::types::{new_id, now_iso, CareError, Result};

/// Store over the typed MongoDB collections.
///
/// Collections (and their indexes) are resolved once at construction.
pub struct MongoCareStore {
    client: MongoClient,
    credentials: MongoCollection<CredentialDoc>,
    profiles: MongoCollection<ProfileDoc>,
    links: MongoCollection<LinkDoc>,
    families: MongoCollection<FamilyDoc>,
    family_members: MongoCollection<FamilyMemberDoc>,
    join_requests: MongoCollection<FamilyJoinRequestDoc>,
    health: MongoCollection<HealthDoc>,
    appointments: MongoCollection<RecordListDoc>,
    medications: MongoCollection<RecordListDoc>,
    activity: MongoCollection<ActivityLogDoc>,
    notifications: MongoCollection<NotificationStateDoc>,
    devices: MongoCollection<RememberedDeviceDoc>,
}

impl MongoCareStore {
    pub async fn new(client: MongoClient) -> Result<Self> {
        Ok(Self {
            credentials: client.collection(CREDENTIAL_COLLECTION).await?,
            profiles: client.collection(PROFILE_COLLECTION).await?,
            links: client.collection(LINK_COLLECTION).await?,
            families: client.collection(FAMILY_COLLECTION).await?,
            family_members: client.collection(FAMILY_MEMBER_COLLECTION).await?,
            join_requests: client.collection(FAMILY_JOIN_REQUEST_COLLECTION).await?,
            health: client.collection(HEALTH_COLLECTION).await?,
            appointments: client.collection(APPOINTMENT_COLLECTION).await?,
            medications: client.collection(MEDICATION_COLLECTION).await?,
            activity: client.collection(ACTIVITY_LOG_COLLECTION).await?,
            notifications: client.collection(NOTIFICATION_STATE_COLLECTION).await?,
            devices: client.collection(REMEMBERED_DEVICE_COLLECTION).await?,
            client,
        })
    }

    fn records_collection(&self, kind: RecordKind) -> &MongoCollection<RecordListDoc> {
        match kind {
            RecordKind::Appointments => &self.appointments,
            RecordKind::Medications => &self.medications,
        }
    }
}

fn statuses(list: &[LinkStatus]) -> Vec<Bson> {
    list.iter().copied().map(Bson::from).collect()
}

fn nullable(value: Option<String>) -> Bson {
    value.map(Bson::String).unwrap_or(Bson::Null)
}

#[async_trait]
impl CareStore for MongoCareStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }

    async fn insert_credential(&self, credential: CredentialDoc) -> Result<CredentialDoc> {
        self.credentials.insert_one(credential).await
    }

    async fn credential_by_id(&self, id: &str) -> Result<Option<CredentialDoc>> {
        self.credentials.find_one(doc! { "_id": id }).await
    }

    async fn credential_by_email(&self, email: &str) -> Result<Option<CredentialDoc>> {
        self.credentials.find_one(doc! { "email": email }).await
    }

    async fn credential_by_phone(&self, phones: &[String]) -> Result<Option<CredentialDoc>> {
        self.credentials
            .find_one(doc! { "phone": { "$in": phones } })
            .await
    }

    async fn credentials_by_ids(&self, ids: &[String]) -> Result<Vec<CredentialDoc>> {
        self.credentials.find_many(doc! { "_id": { "$in": ids } }).await
    }

    async fn replace_credential(&self, credential: &CredentialDoc) -> Result<()> {
        let mut updated = credential.clone();
        updated.updated_at = now_iso();
        let matched = self
            .credentials
            .replace_one(doc! { "_id": credential.id.as_str() }, &updated)
            .await?;
        if matched == 0 {
            return Err(CareError::NotFound("Credential not found.".into()));
        }
        Ok(())
    }

    async fn delete_credential(&self, id: &str) -> Result<u64> {
        self.credentials.delete_many(doc! { "_id": id }).await
    }

    async fn upsert_remembered_device(&self, device: RememberedDeviceDoc) -> Result<()> {
        let now = now_iso();
        self.devices
            .upsert_one(
                doc! { "device_token_hash": device.device_token_hash.as_str() },
                doc! {
                    "$set": {
                        "user_id": device.user_id.as_str(),
                        "label": nullable(device.label),
                        "last_used_at": now.as_str(),
                    },
                    "$setOnInsert": { "_id": device.id.as_str(), "created_at": now.as_str() },
                },
            )
            .await
    }

    async fn remembered_device(&self, token_hash: &str) -> Result<Option<RememberedDeviceDoc>> {
        self.devices
            .find_one(doc! { "device_token_hash": token_hash })
            .await
    }

    async fn rotate_remembered_device(
        &self,
        token_hash: &str,
        next_hash: &str,
    ) -> Result<Option<RememberedDeviceDoc>> {
        let updated = self
            .devices
            .update_many(
                doc! { "device_token_hash": token_hash },
                doc! { "$set": { "device_token_hash": next_hash, "last_used_at": now_iso() } },
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.remembered_device(next_hash).await
    }

    async fn touch_remembered_device(&self, token_hash: &str) -> Result<u64> {
        self.devices
            .update_many(
                doc! { "device_token_hash": token_hash },
                doc! { "$set": { "last_used_at": now_iso() } },
            )
            .await
    }

    async fn delete_remembered_device(&self, token_hash: &str) -> Result<u64> {
        self.devices
            .delete_many(doc! { "device_token_hash": token_hash })
            .await
    }

    async fn delete_remembered_devices_for_user(&self, user_id: &str) -> Result<u64> {
        self.devices.delete_many(doc! { "user_id": user_id }).await
    }

    async fn insert_profile(&self, profile: ProfileDoc) -> Result<ProfileDoc> {
        self.profiles.insert_one(profile).await
    }

    async fn profile_by_id(&self, id: &str) -> Result<Option<ProfileDoc>> {
        self.profiles.find_one(doc! { "_id": id }).await
    }

    async fn profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileDoc>> {
        self.profiles.find_many(doc! { "_id": { "$in": ids } }).await
    }

    async fn profiles_by_owner(&self, column: OwnerColumn, owner_id: &str) -> Result<Vec<ProfileDoc>> {
        self.profiles
            .find_sorted(doc! { column.field(): owner_id }, Some(doc! { "_id": 1 }), None)
            .await
    }

    async fn profiles_by_owners(
        &self,
        column: OwnerColumn,
        owner_ids: &[String],
    ) -> Result<Vec<ProfileDoc>> {
        self.profiles
            .find_many(doc! { column.field(): { "$in": owner_ids } })
            .await
    }

    async fn profiles_by_phone(&self, phones: &[String]) -> Result<Vec<ProfileDoc>> {
        self.profiles.find_many(doc! { "phone": { "$in": phones } }).await
    }

    async fn delete_profile(&self, id: &str) -> Result<u64> {
        self.profiles.delete_many(doc! { "_id": id }).await
    }

    async fn insert_link(&self, link: LinkDoc) -> Result<LinkDoc> {
        self.links.insert_one(link).await
    }

    async fn link_by_id(&self, id: &str) -> Result<Option<LinkDoc>> {
        self.links.find_one(doc! { "_id": id }).await
    }

    async fn links_for_user(&self, user_id: &str) -> Result<Vec<LinkDoc>> {
        self.links
            .find_sorted(
                doc! { "$or": [ { "requester_id": user_id }, { "recipient_id": user_id } ] },
                Some(doc! { "created_at": -1 }),
                None,
            )
            .await
    }

    async fn links_between(
        &self,
        requester_id: &str,
        recipient_id: &str,
        list: &[LinkStatus],
    ) -> Result<Vec<LinkDoc>> {
        self.links
            .find_many(doc! {
                "requester_id": requester_id,
                "recipient_id": recipient_id,
                "status": { "$in": statuses(list) },
            })
            .await
    }

    async fn set_status_between(
        &self,
        requester_id: &str,
        recipient_id: &str,
        from: LinkStatus,
        to: LinkStatus,
    ) -> Result<u64> {
        self.links
            .update_many(
                doc! { "requester_id": requester_id, "recipient_id": recipient_id, "status": from },
                doc! { "$set": { "status": to, "updated_at": now_iso() } },
            )
            .await
    }

    async fn set_relationship_between(
        &self,
        requester_id: &str,
        recipient_id: &str,
        status: LinkStatus,
        relationship: &str,
    ) -> Result<u64> {
        self.links
            .update_many(
                doc! { "requester_id": requester_id, "recipient_id": recipient_id, "status": status },
                doc! { "$set": { "relationship": relationship, "updated_at": now_iso() } },
            )
            .await
    }

    async fn set_link_relation(
        &self,
        link_id: &str,
        side: LinkSide,
        relation: Option<String>,
    ) -> Result<u64> {
        let field = match side {
            LinkSide::Requester => "requester_relation",
            LinkSide::Recipient => "recipient_relation",
        };
        self.links
            .update_many(
                doc! { "_id": link_id },
                doc! { "$set": { field: nullable(relation), "updated_at": now_iso() } },
            )
            .await
    }

    async fn delete_links_in_family(&self, family_id: &str) -> Result<u64> {
        self.links.delete_many(doc! { "family_id": family_id }).await
    }

    async fn delete_links_for_user(&self, user_id: &str) -> Result<u64> {
        self.links
            .delete_many(doc! { "$or": [ { "requester_id": user_id }, { "recipient_id": user_id } ] })
            .await
    }

    async fn insert_family(&self, family: FamilyDoc) -> Result<FamilyDoc> {
        self.families.insert_one(family).await
    }

    async fn insert_family_member(&self, member: FamilyMemberDoc) -> Result<FamilyMemberDoc> {
        self.family_members.insert_one(member).await
    }

    async fn family_membership(&self, user_id: &str) -> Result<Option<FamilyMemberDoc>> {
        self.family_members.find_one(doc! { "user_id": user_id }).await
    }

    async fn delete_family_join_requests(&self, family_id: &str) -> Result<u64> {
        self.join_requests.delete_many(doc! { "family_id": family_id }).await
    }

    async fn delete_family_members(&self, family_id: &str) -> Result<u64> {
        self.family_members.delete_many(doc! { "family_id": family_id }).await
    }

    async fn delete_family(&self, family_id: &str) -> Result<u64> {
        self.families.delete_many(doc! { "_id": family_id }).await
    }

    async fn family_member_count(&self, family_id: &str) -> Result<u64> {
        self.family_members.count(doc! { "family_id": family_id }).await
    }

    async fn delete_family_membership(&self, user_id: &str) -> Result<u64> {
        self.family_members.delete_many(doc! { "user_id": user_id }).await
    }

    async fn delete_join_requests_for_user(&self, user_id: &str) -> Result<u64> {
        self.join_requests.delete_many(doc! { "user_id": user_id }).await
    }

    async fn health_by_profile(&self, profile_id: &str) -> Result<Option<HealthDoc>> {
        self.health.find_one(doc! { "profile_id": profile_id }).await
    }

    async fn upsert_health(
        &self,
        profile_id: &str,
        user_id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        let mut set = bson::to_document(&fields)
            .map_err(|e| CareError::Internal(format!("Failed to encode health fields: {}", e)))?;
        set.insert("user_id", user_id);
        set.insert("updated_at", now_iso());
        self.health
            .upsert_one(
                doc! { "profile_id": profile_id },
                doc! { "$set": set, "$setOnInsert": { "_id": new_id() } },
            )
            .await
    }

    async fn records(&self, kind: RecordKind, profile_id: &str) -> Result<Option<RecordListDoc>> {
        self.records_collection(kind)
            .find_one(doc! { "profile_id": profile_id })
            .await
    }

    async fn save_records(
        &self,
        kind: RecordKind,
        profile_id: &str,
        user_id: Option<&str>,
        data: Value,
    ) -> Result<()> {
        let data = bson::to_bson(&data)
            .map_err(|e| CareError::Internal(format!("Failed to encode records: {}", e)))?;
        let mut insert = doc! { "_id": new_id() };
        if let Some(user_id) = user_id {
            insert.insert("user_id", user_id);
        }
        self.records_collection(kind)
            .upsert_one(
                doc! { "profile_id": profile_id },
                doc! {
                    "$set": { "data": data, "updated_at": now_iso() },
                    "$unset": { kind.wrapper_key(): "" },
                    "$setOnInsert": insert,
                },
            )
            .await
    }

    async fn delete_medical_data(&self, profile_id: &str) -> Result<()> {
        self.health.delete_many(doc! { "profile_id": profile_id }).await?;
        self.appointments.delete_many(doc! { "profile_id": profile_id }).await?;
        self.medications.delete_many(doc! { "profile_id": profile_id }).await?;
        Ok(())
    }

    async fn insert_activity(&self, entry: ActivityLogDoc) -> Result<()> {
        self.activity.insert_one(entry).await.map(|_| ())
    }

    async fn activity(&self, query: &ActivityQuery) -> Result<Vec<ActivityLogDoc>> {
        self.activity
            .find_sorted(
                doc! {
                    "profile_id": { "$in": query.profile_ids.as_slice() },
                    "source": query.source.as_str(),
                    "created_at": { "$gte": query.since.as_str() },
                },
                Some(doc! { "created_at": -1, "_id": -1 }),
                Some(query.limit as i64),
            )
            .await
    }

    async fn delete_activity_for_profile(&self, profile_id: &str) -> Result<u64> {
        self.activity.delete_many(doc! { "profile_id": profile_id }).await
    }

    async fn notification_states(
        &self,
        user_id: &str,
        notification_ids: &[String],
    ) -> Result<Vec<NotificationStateDoc>> {
        self.notifications
            .find_many(doc! { "user_id": user_id, "notification_id": { "$in": notification_ids } })
            .await
    }

    async fn upsert_notification_states(
        &self,
        user_id: &str,
        notification_ids: &[String],
        patch: NotificationPatch,
    ) -> Result<()> {
        let now = now_iso();
        let stamp = |flag: bool| if flag { Bson::String(now.clone()) } else { Bson::Null };

        let mut set = doc! { "updated_at": now.as_str() };
        if let Some(read) = patch.read {
            set.insert("read_at", stamp(read));
        }
        if let Some(dismissed) = patch.dismissed {
            set.insert("dismissed_at", stamp(dismissed));
        }

        for notification_id in notification_ids {
            self.notifications
                .upsert_one(
                    doc! { "user_id": user_id, "notification_id": notification_id },
                    doc! { "$set": set.clone() },
                )
                .await?;
        }
        Ok(())
    }

    async fn delete_notification_states(&self, user_id: &str) -> Result<u64> {
        self.notifications.delete_many(doc! { "user_id": user_id }).await
    }
}

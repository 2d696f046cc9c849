//! Database schemas for CareCircle
//!
//! Documents use string ids (`_id`) and RFC 3339 string timestamps.

mod activity;
mod credential;
mod device;
mod family;
mod link;
mod medical;
mod notification;
mod profile;

pub use activity::{ActivityLogDoc, ACTIVITY_LOG_COLLECTION};
pub use credential::{CredentialDoc, CREDENTIAL_COLLECTION};
pub use device::{RememberedDeviceDoc, REMEMBERED_DEVICE_COLLECTION};
pub use family::{
    FamilyDoc, FamilyJoinRequestDoc, FamilyMemberDoc, FamilyRole, FAMILY_COLLECTION,
    FAMILY_JOIN_REQUEST_COLLECTION, FAMILY_MEMBER_COLLECTION,
};
pub use link::{LinkDoc, LinkSide, LinkStatus, LINK_COLLECTION};
pub use medical::{
    HealthDoc, RecordKind, RecordListDoc, APPOINTMENT_COLLECTION, HEALTH_COLLECTION,
    MEDICATION_COLLECTION,
};
pub use notification::{NotificationStateDoc, NOTIFICATION_STATE_COLLECTION};
pub use profile::{OwnerColumn, ProfileDoc, PROFILE_COLLECTION};

use bson::Document;
use mongodb::options::IndexOptions;

/// Build a named index definition
pub(crate) fn index(keys: Document, name: &str, unique: bool) -> (Document, Option<IndexOptions>) {
    (
        keys,
        Some(
            IndexOptions::builder()
                .name(name.to_string())
                .unique(unique)
                .build(),
        ),
    )
}

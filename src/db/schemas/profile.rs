//! Profile document schema
//!
//! One managed person (self or dependent) under a user account.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, Timestamped};
use crate::db::schemas::index;

/// Collection name for profiles
pub const PROFILE_COLLECTION: &str = "profiles";

/// Column linking a profile to its owning user.
///
/// Newer rows carry `auth_id`; legacy rows only carry `user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerColumn {
    AuthId,
    UserId,
}

impl OwnerColumn {
    pub fn field(self) -> &'static str {
        match self {
            Self::AuthId => "auth_id",
            Self::UserId => "user_id",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ProfileDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

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

    #[serde(default)]
    pub is_primary: bool,

    /// Creation time; legacy imports may carry a missing or malformed value
    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub updated_at: Option<String>,
}

impl ProfileDoc {
    pub fn owner_value(&self, column: OwnerColumn) -> Option<&str> {
        match column {
            OwnerColumn::AuthId => self.auth_id.as_deref(),
            OwnerColumn::UserId => self.user_id.as_deref(),
        }
    }

    /// Owning user id, preferring `auth_id`
    pub fn owner_id(&self) -> Option<&str> {
        self.auth_id.as_deref().or(self.user_id.as_deref())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.auth_id.as_deref() == Some(user_id) || self.user_id.as_deref() == Some(user_id)
    }
}

impl IntoIndexes for ProfileDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            index(doc! { "auth_id": 1 }, "auth_id_index", false),
            index(doc! { "user_id": 1 }, "user_id_index", false),
            index(doc! { "phone": 1 }, "phone_index", false),
        ]
    }
}

impl Timestamped for ProfileDoc {
    fn stamp(&mut self, now: &str) {
        if self.created_at.is_none() {
            self.created_at = Some(now.to_string());
        }
        self.updated_at = Some(now.to_string());
    }
}

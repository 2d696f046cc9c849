//! Family (shared group) document schemas

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, Timestamped};
use crate::db::schemas::index;

pub const FAMILY_COLLECTION: &str = "families";
pub const FAMILY_MEMBER_COLLECTION: &str = "family_members";
pub const FAMILY_JOIN_REQUEST_COLLECTION: &str = "family_join_requests";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FamilyDoc {
    #[serde(rename = "_id")]
    pub id: String,

    pub name: String,

    pub created_by: String,

    #[serde(default)]
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FamilyRole {
    Owner,
    #[default]
    Member,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FamilyMemberDoc {
    #[serde(rename = "_id")]
    pub id: String,

    pub family_id: String,

    pub user_id: String,

    #[serde(default)]
    pub role: FamilyRole,

    #[serde(default)]
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct FamilyJoinRequestDoc {
    #[serde(rename = "_id")]
    pub id: String,

    pub family_id: String,

    pub user_id: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub created_at: String,
}

impl IntoIndexes for FamilyDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![index(doc! { "created_by": 1 }, "created_by_index", false)]
    }
}

impl IntoIndexes for FamilyMemberDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            index(doc! { "user_id": 1 }, "user_unique", true),
            index(doc! { "family_id": 1 }, "family_index", false),
        ]
    }
}

impl IntoIndexes for FamilyJoinRequestDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![index(doc! { "family_id": 1 }, "family_index", false)]
    }
}

macro_rules! stamp_created {
    ($($ty:ty),*) => {
        $(impl Timestamped for $ty {
            fn stamp(&mut self, now: &str) {
                if self.created_at.is_empty() {
                    self.created_at = now.to_string();
                }
            }
        })*
    };
}

stamp_created!(FamilyDoc, FamilyMemberDoc, FamilyJoinRequestDoc);

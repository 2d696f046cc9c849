//! Remembered device document schema
//!
//! Only the SHA-256 of a device token is stored; the token itself lives on
//! the client and is rotated every time it is consumed.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, Timestamped};
use crate::db::schemas::index;

pub const REMEMBERED_DEVICE_COLLECTION: &str = "remembered_devices";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RememberedDeviceDoc {
    #[serde(rename = "_id")]
    pub id: String,

    pub user_id: String,

    /// Hex SHA-256 of the device token
    pub device_token_hash: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub last_used_at: String,

    #[serde(default)]
    pub created_at: String,
}

impl IntoIndexes for RememberedDeviceDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            index(doc! { "device_token_hash": 1 }, "token_hash_unique", true),
            index(doc! { "user_id": 1 }, "user_index", false),
        ]
    }
}

impl Timestamped for RememberedDeviceDoc {
    fn stamp(&mut self, now: &str) {
        if self.created_at.is_empty() {
            self.created_at = now.to_string();
        }
        self.last_used_at = now.to_string();
    }
}

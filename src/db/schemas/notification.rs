//! Notification state document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, Timestamped};
use crate::db::schemas::index;

pub const NOTIFICATION_STATE_COLLECTION: &str = "notification_states";

/// Per-(user, notification) read/dismiss state
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NotificationStateDoc {
    pub user_id: String,

    pub notification_id: String,

    #[serde(default)]
    pub read_at: Option<String>,

    #[serde(default)]
    pub dismissed_at: Option<String>,

    #[serde(default)]
    pub updated_at: String,
}

impl IntoIndexes for NotificationStateDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![index(
            doc! { "user_id": 1, "notification_id": 1 },
            "user_notification_unique",
            true,
        )]
    }
}

impl Timestamped for NotificationStateDoc {
    fn stamp(&mut self, now: &str) {
        self.updated_at = now.to_string();
    }
}

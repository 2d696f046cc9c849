//! Activity log document schema
//!
//! Append-only audit rows; never updated after insert.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::mongo::{IntoIndexes, Timestamped};
use crate::db::schemas::index;

pub const ACTIVITY_LOG_COLLECTION: &str = "profile_activity_logs";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ActivityLogDoc {
    #[serde(rename = "_id")]
    pub id: String,

    pub profile_id: String,

    pub source: String,

    pub domain: String,

    pub action: String,

    pub actor_user_id: String,

    #[serde(default)]
    pub actor_display_name: Option<String>,

    #[serde(default)]
    pub entity_id: Option<String>,

    #[serde(default)]
    pub entity_label: Option<String>,

    #[serde(default)]
    pub metadata: Value,

    #[serde(default)]
    pub created_at: String,
}

impl IntoIndexes for ActivityLogDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![index(
            doc! { "profile_id": 1, "source": 1, "created_at": -1 },
            "profile_source_created_index",
            false,
        )]
    }
}

impl Timestamped for ActivityLogDoc {
    fn stamp(&mut self, now: &str) {
        if self.created_at.is_empty() {
            self.created_at = now.to_string();
        }
    }
}

//! Medical data document schemas
//!
//! Health is one loose document per profile. Appointments and medications
//! are stored as a single JSON payload per profile whose shape varies with
//! the writer (see `care::records`).

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::mongo::{IntoIndexes, Timestamped};
use crate::db::schemas::index;

pub const HEALTH_COLLECTION: &str = "health";
pub const APPOINTMENT_COLLECTION: &str = "user_appointments";
pub const MEDICATION_COLLECTION: &str = "user_medications";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct HealthDoc {
    #[serde(rename = "_id")]
    pub id: String,

    pub profile_id: String,

    /// Remaining health fields, passed through untouched
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Which per-profile record list a document holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Appointments,
    Medications,
}

impl RecordKind {
    pub fn collection(self) -> &'static str {
        match self {
            Self::Appointments => APPOINTMENT_COLLECTION,
            Self::Medications => MEDICATION_COLLECTION,
        }
    }

    /// Key used when the list is wrapped in an object
    pub fn wrapper_key(self) -> &'static str {
        match self {
            Self::Appointments => "appointments",
            Self::Medications => "medications",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RecordListDoc {
    #[serde(rename = "_id")]
    pub id: String,

    pub profile_id: String,

    #[serde(default)]
    pub user_id: Option<String>,

    /// Raw payload: array, wrapped array or JSON-encoded string
    #[serde(default, alias = "appointments", alias = "medications")]
    pub data: Value,

    #[serde(default)]
    pub updated_at: String,
}

impl IntoIndexes for HealthDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![index(doc! { "profile_id": 1 }, "profile_unique", true)]
    }
}

impl IntoIndexes for RecordListDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![index(doc! { "profile_id": 1 }, "profile_unique", true)]
    }
}

impl Timestamped for HealthDoc {
    fn stamp(&mut self, now: &str) {
        self.fields
            .insert("updated_at".to_string(), Value::String(now.to_string()));
    }
}

impl Timestamped for RecordListDoc {
    fn stamp(&mut self, now: &str) {
        self.updated_at = now.to_string();
    }
}

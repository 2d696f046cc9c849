//! Credential document schema
//!
//! The identity record behind a session: email/phone, password hash and
//! token version.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, Timestamped};
use crate::db::schemas::index;

/// Collection name for credentials
pub const CREDENTIAL_COLLECTION: &str = "credentials";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CredentialDoc {
    /// Stable user id
    #[serde(rename = "_id")]
    pub id: String,

    /// Lowercased email, absent for phone-only accounts
    #[serde(default)]
    pub email: Option<String>,

    /// E.164 phone number
    #[serde(default)]
    pub phone: Option<String>,

    /// Argon2 hash, absent for OTP-only accounts
    #[serde(default)]
    pub password_hash: Option<String>,

    #[serde(default)]
    pub email_confirmed: bool,

    /// Token version for invalidation (increment to invalidate all tokens)
    #[serde(default)]
    pub token_version: i32,

    #[serde(default)]
    pub created_at: String,

    #[serde(default)]
    pub updated_at: String,
}

impl CredentialDoc {
    pub fn new(email: Option<String>, phone: Option<String>, password_hash: Option<String>) -> Self {
        Self {
            id: crate::types::new_id(),
            email: email.map(|e| e.trim().to_lowercase()),
            phone,
            password_hash,
            email_confirmed: false,
            token_version: 1,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }
}

impl IntoIndexes for CredentialDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Sparse-style uniqueness: only documents with an email participate
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "email": { "$type": "string" } })
                        .name("email_unique".to_string())
                        .build(),
                ),
            ),
            index(doc! { "phone": 1 }, "phone_index", false),
        ]
    }
}

impl Timestamped for CredentialDoc {
    fn stamp(&mut self, now: &str) {
        if self.created_at.is_empty() {
            self.created_at = now.to_string();
        }
        self.updated_at = now.to_string();
    }
}

//! Care-circle link document schema
//!
//! A directed edge between two users. Created pending by the requester,
//! moved to accepted or declined by the recipient, never moved back.

use bson::{doc, Bson, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, Timestamped};
use crate::db::schemas::index;

/// Collection name for care-circle links
pub const LINK_COLLECTION: &str = "care_circle_links";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    /// Parse a respond decision; only terminal states are accepted
    pub fn parse_decision(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

impl From<LinkStatus> for Bson {
    fn from(status: LinkStatus) -> Self {
        Bson::String(status.as_str().to_string())
    }
}

/// Which end of a link a user sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    Requester,
    Recipient,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LinkDoc {
    #[serde(rename = "_id")]
    pub id: String,

    pub requester_id: String,

    pub recipient_id: String,

    #[serde(default)]
    pub status: LinkStatus,

    /// Free-text relationship kind; normalized to family/friend for access checks
    #[serde(default)]
    pub relationship: Option<String>,

    /// Requester's profile shared through this link
    #[serde(default)]
    pub profile_id: Option<String>,

    /// Shared group id
    #[serde(default)]
    pub family_id: Option<String>,

    #[serde(default)]
    pub requester_relation: Option<String>,

    #[serde(default)]
    pub recipient_relation: Option<String>,

    #[serde(default)]
    pub created_at: String,

    #[serde(default)]
    pub updated_at: String,
}

impl LinkDoc {
    pub fn new_invite(
        requester_id: &str,
        recipient_id: &str,
        profile_id: Option<String>,
        family_id: Option<String>,
    ) -> Self {
        Self {
            id: crate::types::new_id(),
            requester_id: requester_id.to_string(),
            recipient_id: recipient_id.to_string(),
            status: LinkStatus::Pending,
            relationship: Some("friend".to_string()),
            profile_id,
            family_id,
            ..Default::default()
        }
    }

    pub fn side_of(&self, user_id: &str) -> Option<LinkSide> {
        if self.requester_id == user_id {
            Some(LinkSide::Requester)
        } else if self.recipient_id == user_id {
            Some(LinkSide::Recipient)
        } else {
            None
        }
    }

    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        match self.side_of(user_id)? {
            LinkSide::Requester => Some(&self.recipient_id),
            LinkSide::Recipient => Some(&self.requester_id),
        }
    }

    /// Relation label stored on the given user's side
    pub fn relation_for(&self, side: LinkSide) -> Option<&str> {
        match side {
            LinkSide::Requester => self.requester_relation.as_deref(),
            LinkSide::Recipient => self.recipient_relation.as_deref(),
        }
    }
}

impl IntoIndexes for LinkDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            index(
                doc! { "requester_id": 1, "recipient_id": 1, "status": 1 },
                "pair_status_index",
                false,
            ),
            index(doc! { "recipient_id": 1 }, "recipient_index", false),
            index(doc! { "family_id": 1 }, "family_index", false),
        ]
    }
}

impl Timestamped for LinkDoc {
    fn stamp(&mut self, now: &str) {
        if self.created_at.is_empty() {
            self.created_at = now.to_string();
        }
        self.updated_at = now.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decision() {
        assert_eq!(LinkStatus::parse_decision(" Accepted "), Some(LinkStatus::Accepted));
        assert_eq!(LinkStatus::parse_decision("DECLINED"), Some(LinkStatus::Declined));
        assert_eq!(LinkStatus::parse_decision("accept"), None);
        assert_eq!(LinkStatus::parse_decision("decline"), None);
        assert_eq!(LinkStatus::parse_decision("pending"), None);
        assert_eq!(LinkStatus::parse_decision(""), None);
    }

    #[test]
    fn test_counterpart() {
        let link = LinkDoc::new_invite("a", "b", None, None);
        assert_eq!(link.counterpart_of("a"), Some("b"));
        assert_eq!(link.counterpart_of("b"), Some("a"));
        assert_eq!(link.counterpart_of("c"), None);
        assert_eq!(link.relationship.as_deref(), Some("friend"));
    }
}

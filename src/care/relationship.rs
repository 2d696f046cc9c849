//! Relationship aggregation
//!
//! Partitions a user's links into outgoing and incoming views, resolves
//! counterpart names and finds the user's shared group id.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::care::profile::UNKNOWN_MEMBER;
use crate::db::schemas::{LinkDoc, LinkStatus};
use crate::store::CareStore;
use crate::types::Result;

/// Normalized relationship kind used for access decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    Family,
    Friend,
}

impl RelationshipKind {
    /// Normalize a stored relationship string.
    ///
    /// Only the exact token `family` grants family status; anything else,
    /// including `family_member`, is the more restrictive `Friend`.
    pub fn normalize(raw: Option<&str>) -> Self {
        match normalize_token(raw.unwrap_or_default()).as_str() {
            "family" => Self::Family,
            _ => Self::Friend,
        }
    }

    /// Parse a role chosen by a user; unlike `normalize` this rejects unknowns
    pub fn parse_role(raw: &str) -> Option<Self> {
        match normalize_token(raw).as_str() {
            "family" => Some(Self::Family),
            "friend" => Some(Self::Friend),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Family => "family",
            Self::Friend => "friend",
        }
    }
}

/// Trim, lowercase and collapse runs of hyphens/whitespace to `_`
pub fn normalize_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_separator = false;
    for ch in raw.trim().chars() {
        if ch == '-' || ch.is_whitespace() {
            if !in_separator {
                out.push('_');
                in_separator = true;
            }
        } else {
            out.extend(ch.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// Shared group id for a user: accepted links win over pending ones
pub fn resolve_group_id(user_id: &str, links: &[LinkDoc]) -> Option<String> {
    let group_with = |status: LinkStatus| {
        links
            .iter()
            .filter(|l| l.status == status && l.side_of(user_id).is_some())
            .find_map(|l| l.family_id.clone())
    };
    group_with(LinkStatus::Accepted).or_else(|| group_with(LinkStatus::Pending))
}

/// Links split by the user's side
#[derive(Debug, Default)]
pub struct Partitioned<'a> {
    pub outgoing: Vec<&'a LinkDoc>,
    pub incoming: Vec<&'a LinkDoc>,
}

pub fn partition<'a>(user_id: &str, links: &'a [LinkDoc]) -> Partitioned<'a> {
    let mut parts = Partitioned::default();
    for link in links {
        if link.requester_id == user_id {
            parts.outgoing.push(link);
        } else if link.recipient_id == user_id {
            parts.incoming.push(link);
        }
    }
    parts
}

/// Distinct counterpart ids, in first-seen order
pub fn counterpart_ids(user_id: &str, links: &[LinkDoc]) -> Vec<String> {
    let mut seen = HashSet::new();
    links
        .iter()
        .filter_map(|l| l.counterpart_of(user_id))
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

/// One link as seen from one side
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLink {
    pub id: String,
    pub member_id: String,
    pub status: LinkStatus,
    pub display_name: String,
    pub relation: Option<String>,
    pub created_at: String,
}

/// Group-level overview of a user's links
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOverview {
    pub family_id: Option<String>,
    pub outgoing: Vec<MemberLink>,
    pub incoming: Vec<MemberLink>,
}

/// Aggregate every link touching `user_id`, naming counterparts from the
/// credentials table.
pub async fn aggregate(store: &dyn CareStore, user_id: &str) -> Result<LinkOverview> {
    let links = store.links_for_user(user_id).await?;
    let ids = counterpart_ids(user_id, &links);

    let names: HashMap<String, String> = if ids.is_empty() {
        HashMap::new()
    } else {
        store
            .credentials_by_ids(&ids)
            .await?
            .into_iter()
            .filter_map(|c| {
                let label = c.email.or(c.phone)?;
                Some((c.id, label))
            })
            .collect()
    };

    let view = |link: &LinkDoc| {
        let side = link.side_of(user_id)?;
        let member_id = link.counterpart_of(user_id)?.to_string();
        Some(MemberLink {
            id: link.id.clone(),
            display_name: names
                .get(&member_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_MEMBER.to_string()),
            member_id,
            status: link.status,
            relation: link.relation_for(side).map(str::to_string),
            created_at: link.created_at.clone(),
        })
    };

    let parts = partition(user_id, &links);
    Ok(LinkOverview {
        family_id: resolve_group_id(user_id, &links),
        outgoing: parts.outgoing.into_iter().filter_map(&view).collect(),
        incoming: parts.incoming.into_iter().filter_map(&view).collect(),
    })
}

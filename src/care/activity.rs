//! Care-circle activity log
//!
//! Writes are best-effort: name resolution and insert failures are logged
//! and swallowed so the mutation that triggered them still succeeds.

use chrono::{Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::care::profile::{owned_profile, owned_profiles, pick_preferred};
use crate::care::relationship::RelationshipKind;
use crate::db::schemas::{ActivityLogDoc, LinkStatus, ProfileDoc};
use crate::store::{ActivityQuery, CareStore};
use crate::types::{new_id, Result};

pub const CARE_CIRCLE_SOURCE: &str = "care_circle";

pub const DEFAULT_FEED_LIMIT: usize = 30;
pub const MAX_FEED_LIMIT: usize = 100;
pub const DEFAULT_FEED_HOURS: u64 = 24;
pub const MAX_FEED_HOURS: u64 = 168;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityDomain {
    Vault,
    Medication,
    Appointment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityAction {
    Upload,
    Rename,
    Delete,
    Add,
    Update,
}

impl ActivityDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vault => "vault",
            Self::Medication => "medication",
            Self::Appointment => "appointment",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "vault" => Some(Self::Vault),
            "medication" => Some(Self::Medication),
            "appointment" => Some(Self::Appointment),
            _ => None,
        }
    }
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Rename => "rename",
            Self::Delete => "delete",
            Self::Add => "add",
            Self::Update => "update",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "upload" => Some(Self::Upload),
            "rename" => Some(Self::Rename),
            "delete" => Some(Self::Delete),
            "add" => Some(Self::Add),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

/// One auditable mutation
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    pub profile_id: String,
    pub actor_user_id: String,
    pub actor_profile_id: Option<String>,
    pub actor_display_name: Option<String>,
    pub domain: ActivityDomain,
    pub action: ActivityAction,
    pub entity_id: Option<String>,
    pub entity_label: Option<String>,
    pub metadata: Map<String, Value>,
}

impl ActivityEvent {
    pub fn new(
        profile_id: impl Into<String>,
        actor_user_id: impl Into<String>,
        domain: ActivityDomain,
        action: ActivityAction,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            actor_user_id: actor_user_id.into(),
            actor_profile_id: None,
            actor_display_name: None,
            domain,
            action,
            entity_id: None,
            entity_label: None,
            metadata: Map::new(),
        }
    }

    pub fn actor_profile(mut self, profile_id: Option<&str>) -> Self {
        self.actor_profile_id = profile_id.map(str::to_string);
        self
    }

    pub fn entity(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self.entity_label = Some(label.into());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

fn sanitize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Display name or name of a profile, without the phone/unknown fallbacks
fn profile_label(profile: &ProfileDoc) -> Option<String> {
    sanitize(profile.display_name.as_deref()).or_else(|| sanitize(profile.name.as_deref()))
}

/// Actor name: explicit > owned actor profile > preferred profile
async fn resolve_actor_name(store: &dyn CareStore, event: &ActivityEvent) -> Result<Option<String>> {
    if let Some(name) = sanitize(event.actor_display_name.as_deref()) {
        return Ok(Some(name));
    }

    if let Some(profile_id) = sanitize(event.actor_profile_id.as_deref()) {
        let named = owned_profile(store, &event.actor_user_id, &profile_id)
            .await?
            .and_then(|p| profile_label(&p));
        if named.is_some() {
            return Ok(named);
        }
    }

    let profiles = owned_profiles(store, &event.actor_user_id).await?;
    Ok(pick_preferred(&profiles).and_then(profile_label))
}

/// Append an audit row. Never fails.
pub async fn log_activity(store: &dyn CareStore, event: ActivityEvent) {
    if event.profile_id.trim().is_empty() || event.actor_user_id.trim().is_empty() {
        debug!("Skipping activity log without profile or actor");
        return;
    }

    let actor_display_name = match resolve_actor_name(store, &event).await {
        Ok(name) => name,
        Err(e) => {
            warn!("Failed to resolve activity actor name: {}", e);
            None
        }
    };

    let entry = ActivityLogDoc {
        id: new_id(),
        profile_id: event.profile_id,
        source: CARE_CIRCLE_SOURCE.to_string(),
        domain: event.domain.as_str().to_string(),
        action: event.action.as_str().to_string(),
        actor_user_id: event.actor_user_id,
        actor_display_name,
        entity_id: sanitize(event.entity_id.as_deref()),
        entity_label: sanitize(event.entity_label.as_deref()),
        metadata: Value::Object(event.metadata),
        created_at: String::new(),
    };

    if let Err(e) = store.insert_activity(entry).await {
        warn!("Failed to write care circle activity log: {}", e);
    }
}

/// Parse a positive integer query value with a default and a cap
pub fn clamp_positive(raw: Option<&str>, default: u64, max: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| (v.floor() as u64).min(max))
        .unwrap_or(default)
}

/// Feed window: `limit` rows no older than `since_hours`
#[derive(Debug, Clone, Copy)]
pub struct FeedWindow {
    pub limit: usize,
    pub since_hours: u64,
}

impl FeedWindow {
    pub fn from_query(limit: Option<&str>, since_hours: Option<&str>) -> Self {
        Self {
            limit: clamp_positive(limit, DEFAULT_FEED_LIMIT as u64, MAX_FEED_LIMIT as u64) as usize,
            since_hours: clamp_positive(since_hours, DEFAULT_FEED_HOURS, MAX_FEED_HOURS),
        }
    }

    fn cutoff(&self) -> String {
        (Utc::now() - Duration::hours(self.since_hours as i64))
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Activity row as returned by the feeds
#[derive(Debug, Clone, Serialize)]
pub struct FeedEntry {
    pub id: String,
    pub profile_id: String,
    pub source: String,
    pub domain: String,
    pub action: String,
    pub actor_user_id: String,
    pub actor_display_name: Option<String>,
    pub entity_id: Option<String>,
    pub entity_label: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    pub profile_label: Option<String>,
    pub link_id: Option<String>,
}

async fn load_feed(
    store: &dyn CareStore,
    link_by_profile: &HashMap<String, String>,
    profile_ids: Vec<String>,
    window: FeedWindow,
) -> Result<Vec<FeedEntry>> {
    if profile_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = store
        .activity(&ActivityQuery {
            profile_ids,
            source: CARE_CIRCLE_SOURCE.to_string(),
            since: window.cutoff(),
            limit: window.limit,
        })
        .await?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut labelled: Vec<String> = rows.iter().map(|r| r.profile_id.clone()).collect();
    labelled.sort();
    labelled.dedup();
    let labels: HashMap<String, String> = store
        .profiles_by_ids(&labelled)
        .await?
        .iter()
        .filter_map(|p| Some((p.id.clone(), profile_label(p)?)))
        .collect();

    Ok(rows
        .into_iter()
        .map(|row| FeedEntry {
            profile_label: labels.get(&row.profile_id).cloned(),
            link_id: link_by_profile.get(&row.profile_id).cloned(),
            id: row.id,
            profile_id: row.profile_id,
            source: row.source,
            domain: row.domain,
            action: row.action,
            actor_user_id: row.actor_user_id,
            actor_display_name: row.actor_display_name,
            entity_id: row.entity_id,
            entity_label: row.entity_label,
            metadata: row.metadata,
            created_at: row.created_at,
        })
        .collect())
}

/// Activity on every profile shared with the user through an accepted
/// family link where the user is the recipient
pub async fn circle_feed(
    store: &dyn CareStore,
    user_id: &str,
    window: FeedWindow,
) -> Result<Vec<FeedEntry>> {
    let links = store.links_for_user(user_id).await?;

    let mut link_by_profile = HashMap::new();
    let mut profile_ids = Vec::new();
    for link in links.iter().filter(|l| {
        l.recipient_id == user_id
            && l.status == LinkStatus::Accepted
            && RelationshipKind::normalize(l.relationship.as_deref()) == RelationshipKind::Family
    }) {
        let Some(profile_id) = link.profile_id.as_deref() else {
            continue;
        };
        if !link_by_profile.contains_key(profile_id) {
            link_by_profile.insert(profile_id.to_string(), link.id.clone());
            profile_ids.push(profile_id.to_string());
        }
    }

    load_feed(store, &link_by_profile, profile_ids, window).await
}

/// Activity on one of the user's own profiles
pub async fn profile_feed(
    store: &dyn CareStore,
    profile_id: &str,
    window: FeedWindow,
) -> Result<Vec<FeedEntry>> {
    load_feed(store, &HashMap::new(), vec![profile_id.to_string()], window).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::fixtures::{family_link, primary_profile, profile};
    use crate::store::MemoryStore;
    use crate::types::now_iso;

    fn event() -> ActivityEvent {
        ActivityEvent::new("p-owner", "actor", ActivityDomain::Vault, ActivityAction::Upload)
            .entity("reports/x.pdf", "x.pdf")
    }

    #[tokio::test]
    async fn test_explicit_name_wins() {
        let store = MemoryStore::new();
        store.insert_profile(primary_profile("a1", "actor", "Ravi")).await.unwrap();
        let mut e = event();
        e.actor_display_name = Some("  Dr. Mehta ".into());
        log_activity(&store, e).await;

        let rows = store.all_activity().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].actor_display_name.as_deref(), Some("Dr. Mehta"));
        assert_eq!(rows[0].source, CARE_CIRCLE_SOURCE);
        assert_eq!(rows[0].metadata, Value::Object(Map::new()));
    }

    #[tokio::test]
    async fn test_actor_profile_must_be_owned() {
        let store = MemoryStore::new();
        store.insert_profile(primary_profile("a1", "actor", "Ravi")).await.unwrap();
        store.insert_profile(profile("foreign", "someone", "Imposter")).await.unwrap();

        log_activity(&store, event().actor_profile(Some("foreign"))).await;
        let rows = store.all_activity().await;
        assert_eq!(rows[0].actor_display_name.as_deref(), Some("Ravi"));
    }

    #[tokio::test]
    async fn test_owned_actor_profile_used() {
        let store = MemoryStore::new();
        store.insert_profile(primary_profile("a1", "actor", "Ravi")).await.unwrap();
        store.insert_profile(profile("a2", "actor", "Ravi Jr")).await.unwrap();

        log_activity(&store, event().actor_profile(Some("a2"))).await;
        assert_eq!(
            store.all_activity().await[0].actor_display_name.as_deref(),
            Some("Ravi Jr")
        );
    }

    #[tokio::test]
    async fn test_unresolved_name_is_null() {
        let store = MemoryStore::new();
        log_activity(&store, event()).await;
        let rows = store.all_activity().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].actor_display_name.is_none());
    }

    #[tokio::test]
    async fn test_name_lookup_failure_still_writes() {
        let store = MemoryStore::new();
        store.fail("profiles_by_owner");
        log_activity(&store, event()).await;
        assert_eq!(store.all_activity().await.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_failure_is_swallowed() {
        let store = MemoryStore::new();
        store.fail("insert_activity");
        log_activity(&store, event()).await;
        assert!(store.all_activity().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_ids_skip() {
        let store = MemoryStore::new();
        let e = ActivityEvent::new("", "actor", ActivityDomain::Vault, ActivityAction::Delete);
        log_activity(&store, e).await;
        assert!(store.all_activity().await.is_empty());
    }

    #[test]
    fn test_clamp_positive() {
        assert_eq!(clamp_positive(None, 30, 100), 30);
        assert_eq!(clamp_positive(Some("abc"), 30, 100), 30);
        assert_eq!(clamp_positive(Some("0"), 30, 100), 30);
        assert_eq!(clamp_positive(Some("-5"), 30, 100), 30);
        assert_eq!(clamp_positive(Some("7.9"), 30, 100), 7);
        assert_eq!(clamp_positive(Some("500"), 30, 100), 100);
    }

    #[test]
    fn test_domain_action_parse() {
        assert_eq!(ActivityDomain::parse("medication"), Some(ActivityDomain::Medication));
        assert_eq!(ActivityDomain::parse("billing"), None);
        assert_eq!(ActivityAction::parse("rename"), Some(ActivityAction::Rename));
        assert_eq!(ActivityAction::parse("archive"), None);
    }

    #[tokio::test]
    async fn test_circle_feed_only_family_links() {
        let store = MemoryStore::new();
        store.insert_profile(primary_profile("p-owner", "owner", "Grandma")).await.unwrap();
        store.insert_link(family_link("l1", "owner", "viewer", "p-owner")).await.unwrap();

        let mut friend = family_link("l2", "other", "viewer", "p-other");
        friend.relationship = Some("friend".into());
        store.insert_link(friend).await.unwrap();

        for profile_id in ["p-owner", "p-other"] {
            store
                .insert_activity(ActivityLogDoc {
                    id: new_id(),
                    profile_id: profile_id.into(),
                    source: CARE_CIRCLE_SOURCE.into(),
                    domain: "vault".into(),
                    action: "upload".into(),
                    actor_user_id: "owner".into(),
                    metadata: Value::Object(Map::new()),
                    created_at: now_iso(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let feed = circle_feed(&store, "viewer", FeedWindow::from_query(None, None))
            .await
            .unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].profile_id, "p-owner");
        assert_eq!(feed[0].profile_label.as_deref(), Some("Grandma"));
        assert_eq!(feed[0].link_id.as_deref(), Some("l1"));
    }

    #[tokio::test]
    async fn test_feed_orders_newest_first_and_limits() {
        let store = MemoryStore::new();
        store.insert_link(family_link("l1", "owner", "viewer", "p")).await.unwrap();
        let base = Utc::now();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let created = (base - Duration::minutes(i as i64))
                .to_rfc3339_opts(SecondsFormat::Millis, true);
            store
                .insert_activity(ActivityLogDoc {
                    id: id.to_string(),
                    profile_id: "p".into(),
                    source: CARE_CIRCLE_SOURCE.into(),
                    created_at: created,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        // outside the window
        store
            .insert_activity(ActivityLogDoc {
                id: "old".into(),
                profile_id: "p".into(),
                source: CARE_CIRCLE_SOURCE.into(),
                created_at: "2000-01-01T00:00:00.000Z".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let window = FeedWindow::from_query(Some("2"), Some("1"));
        let feed = circle_feed(&store, "viewer", window).await.unwrap();
        let ids: Vec<&str> = feed.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}

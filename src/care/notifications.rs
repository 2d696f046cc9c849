//! Per-user notification read/dismiss state

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::schemas::NotificationStateDoc;
use crate::store::{CareStore, NotificationPatch};
use crate::types::{CareError, Result};

pub const MAX_NOTIFICATION_IDS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationState {
    pub notification_id: String,
    pub read_at: Option<String>,
    pub dismissed_at: Option<String>,
    pub updated_at: String,
}

impl From<NotificationStateDoc> for NotificationState {
    fn from(doc: NotificationStateDoc) -> Self {
        Self {
            notification_id: doc.notification_id,
            read_at: doc.read_at,
            dismissed_at: doc.dismissed_at,
            updated_at: doc.updated_at,
        }
    }
}

fn dedupe_capped<I: IntoIterator<Item = String>>(ids: I) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        let id = id.trim();
        if id.is_empty() || out.iter().any(|seen| seen == id) {
            continue;
        }
        out.push(id.to_string());
        if out.len() == MAX_NOTIFICATION_IDS {
            break;
        }
    }
    out
}

/// Ids from a comma-separated `ids` query value. Undecodable entries are
/// used as given.
pub fn parse_query_ids(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    dedupe_capped(raw.split(',').map(|entry| {
        urlencoding::decode(entry)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| entry.to_string())
    }))
}

/// Ids from a JSON body value; non-string entries are skipped
pub fn parse_body_ids(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => {
            dedupe_capped(items.iter().filter_map(|v| v.as_str().map(str::to_string)))
        }
        _ => Vec::new(),
    }
}

pub async fn get_states(
    store: &dyn CareStore,
    user_id: &str,
    ids: &[String],
) -> Result<Vec<NotificationState>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(store
        .notification_states(user_id, ids)
        .await?
        .into_iter()
        .map(NotificationState::from)
        .collect())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    #[serde(default)]
    pub notification_ids: Option<Value>,
    #[serde(default)]
    pub dismissed: Option<Value>,
    #[serde(default)]
    pub read: Option<Value>,
}

/// Upsert read/dismissed flags; `true` stamps now, `false` clears
pub async fn update_states(store: &dyn CareStore, user_id: &str, update: StateUpdate) -> Result<()> {
    let ids = parse_body_ids(update.notification_ids.as_ref());
    if ids.is_empty() {
        return Err(CareError::BadRequest("notificationIds is required.".into()));
    }

    let patch = NotificationPatch {
        read: update.read.as_ref().and_then(Value::as_bool),
        dismissed: update.dismissed.as_ref().and_then(Value::as_bool),
    };
    if patch.is_empty() {
        return Err(CareError::BadRequest(
            "At least one of dismissed/read must be provided.".into(),
        ));
    }

    store.upsert_notification_states(user_id, &ids, patch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn update(value: Value) -> StateUpdate {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_query_ids_decoded_and_deduped() {
        let ids = parse_query_ids(Some("a%2Fb, c,,a%2Fb,%E0%A4"));
        assert_eq!(ids, vec!["a/b", "c", "%E0%A4"]);
        assert!(parse_query_ids(None).is_empty());
    }

    #[test]
    fn test_ids_capped() {
        let raw: Vec<String> = (0..250).map(|i| format!("n{}", i)).collect();
        assert_eq!(parse_query_ids(Some(&raw.join(","))).len(), MAX_NOTIFICATION_IDS);
        assert_eq!(parse_body_ids(Some(&json!(raw))).len(), MAX_NOTIFICATION_IDS);
    }

    #[tokio::test]
    async fn test_empty_ids_skip_store() {
        let store = MemoryStore::new();
        store.fail("notification_states");
        assert!(get_states(&store, "u", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let ids = vec!["n1".to_string()];

        update_states(&store, "u", update(json!({ "notificationIds": ["n1"], "read": true })))
            .await
            .unwrap();
        for _ in 0..2 {
            update_states(&store, "u", update(json!({ "notificationIds": ["n1"], "dismissed": true })))
                .await
                .unwrap();
        }

        let states = get_states(&store, "u", &ids).await.unwrap();
        assert_eq!(states.len(), 1);
        assert!(states[0].dismissed_at.is_some());
        assert!(states[0].read_at.is_some());

        update_states(&store, "u", update(json!({ "notificationIds": ["n1"], "dismissed": false })))
            .await
            .unwrap();
        let states = get_states(&store, "u", &ids).await.unwrap();
        assert_eq!(states.len(), 1);
        assert!(states[0].dismissed_at.is_none());
        assert!(states[0].read_at.is_some());
    }

    #[tokio::test]
    async fn test_absent_ids_not_fabricated() {
        let store = MemoryStore::new();
        update_states(&store, "u", update(json!({ "notificationIds": ["n1"], "read": true })))
            .await
            .unwrap();
        let states = get_states(&store, "u", &["n1".into(), "n2".into()]).await.unwrap();
        assert_eq!(states.len(), 1);
        let other_user = get_states(&store, "v", &["n1".into()]).await.unwrap();
        assert!(other_user.is_empty());
    }

    #[tokio::test]
    async fn test_validation_messages() {
        let store = MemoryStore::new();
        let err = update_states(&store, "u", update(json!({ "read": true }))).await.unwrap_err();
        assert_eq!(err.to_string(), "notificationIds is required.");
        let err = update_states(&store, "u", update(json!({ "notificationIds": ["n"], "read": "yes" })))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "At least one of dismissed/read must be provided.");
    }
}

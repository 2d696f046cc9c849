//! Preferred-profile resolution
//!
//! A user may own several profiles. The preferred one is the primary
//! profile, else the oldest; rows without a usable `created_at` sort last.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::future::Future;
use tracing::debug;

use crate::db::schemas::{OwnerColumn, ProfileDoc};
use crate::store::CareStore;
use crate::types::Result;

pub const UNKNOWN_MEMBER: &str = "Unknown member";

/// Anything that can compete for "preferred" status
pub trait ProfileCandidate {
    fn is_primary(&self) -> bool;
    fn created_at(&self) -> Option<&str>;
}

impl ProfileCandidate for ProfileDoc {
    fn is_primary(&self) -> bool {
        self.is_primary
    }

    fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }
}

/// Parse the timestamp shapes seen in stored rows
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Postgres text form: "2024-01-02 03:04:05.123+00"
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Candidates in preference order. The sort is stable.
pub fn sort_by_preference<T: ProfileCandidate>(rows: &[T]) -> Vec<&T> {
    let mut sorted: Vec<&T> = rows.iter().collect();
    sorted.sort_by_key(|row| {
        let created = row
            .created_at()
            .and_then(parse_timestamp)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (!row.is_primary(), created)
    });
    sorted
}

pub fn pick_preferred<T: ProfileCandidate>(rows: &[T]) -> Option<&T> {
    sort_by_preference(rows).into_iter().next()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Human label for a profile
pub fn display_name(profile: &ProfileDoc) -> String {
    non_empty(profile.display_name.as_deref())
        .or_else(|| non_empty(profile.name.as_deref()))
        .or_else(|| non_empty(profile.phone.as_deref()))
        .unwrap_or(UNKNOWN_MEMBER)
        .to_string()
}

/// Run an owner-scoped query by `auth_id`, falling back to `user_id`.
///
/// The fallback runs when the first query returns nothing or reports the
/// column as missing. Errors from the fallback query propagate.
pub async fn with_owner_fallback<T, F, Fut>(mut query: F) -> Result<Vec<T>>
where
    F: FnMut(OwnerColumn) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    match query(OwnerColumn::AuthId).await {
        Ok(rows) if !rows.is_empty() => return Ok(rows),
        Ok(_) => {}
        Err(e) if e.is_missing_field() => {
            debug!("auth_id lookup unavailable, falling back to user_id: {}", e);
        }
        Err(e) => return Err(e),
    }
    query(OwnerColumn::UserId).await
}

/// All profiles owned by a user
pub async fn owned_profiles(store: &dyn CareStore, user_id: &str) -> Result<Vec<ProfileDoc>> {
    with_owner_fallback(|column| store.profiles_by_owner(column, user_id)).await
}

/// The user's preferred profile, if they own any
pub async fn preferred_profile(store: &dyn CareStore, user_id: &str) -> Result<Option<ProfileDoc>> {
    let rows = owned_profiles(store, user_id).await?;
    Ok(pick_preferred(&rows).cloned())
}

/// Fetch a profile only when the user owns it
pub async fn owned_profile(
    store: &dyn CareStore,
    user_id: &str,
    profile_id: &str,
) -> Result<Option<ProfileDoc>> {
    Ok(store
        .profile_by_id(profile_id)
        .await?
        .filter(|p| p.is_owned_by(user_id)))
}

/// Resolve the profile to act on: an explicit owned id, or the preferred one.
///
/// Returns `Ok(None)` when an explicit id is not owned by the user.
pub async fn select_profile(
    store: &dyn CareStore,
    user_id: &str,
    requested: Option<&str>,
) -> Result<Option<ProfileDoc>> {
    match requested.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => owned_profile(store, user_id, id).await,
        None => preferred_profile(store, user_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::care::fixtures::profile;
    use crate::store::MemoryStore;
    use crate::types::CareError;

    fn row(id: &str, primary: bool, created: Option<&str>) -> ProfileDoc {
        let mut p = profile(id, "owner", id);
        p.is_primary = primary;
        p.created_at = created.map(str::to_string);
        p
    }

    #[test]
    fn test_primary_wins() {
        let rows = vec![
            row("old", false, Some("2020-01-01T00:00:00Z")),
            row("primary", true, Some("2024-01-01T00:00:00Z")),
        ];
        assert_eq!(pick_preferred(&rows).unwrap().id, "primary");
    }

    #[test]
    fn test_earliest_valid_timestamp_wins() {
        let rows = vec![
            row("missing", false, None),
            row("garbage", false, Some("not a date")),
            row("late", false, Some("2024-06-01 10:00:00+00")),
            row("early", false, Some("2023-01-01T00:00:00.000Z")),
        ];
        assert_eq!(pick_preferred(&rows).unwrap().id, "early");
    }

    #[test]
    fn test_invalid_timestamps_never_beat_valid_ones() {
        let rows = vec![row("missing", false, None), row("valid", false, Some("2030-01-01"))];
        assert_eq!(pick_preferred(&rows).unwrap().id, "valid");
    }

    #[test]
    fn test_equal_keys_keep_input_order() {
        let rows = vec![
            row("first", false, None),
            row("second", false, Some("bogus")),
            row("third", false, None),
        ];
        let order: Vec<&str> = sort_by_preference(&rows).iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_empty_set() {
        let rows: Vec<ProfileDoc> = Vec::new();
        assert!(pick_preferred(&rows).is_none());
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut p = profile("p", "u", "  ");
        p.name = Some(" Asha ".into());
        assert_eq!(display_name(&p), "Asha");
        p.name = None;
        p.phone = Some("+919876543210".into());
        assert_eq!(display_name(&p), "+919876543210");
        p.phone = None;
        assert_eq!(display_name(&p), UNKNOWN_MEMBER);
    }

    #[tokio::test]
    async fn test_fallback_to_user_id_on_empty() {
        let store = MemoryStore::new();
        let mut legacy = profile("legacy", "u1", "Legacy");
        legacy.auth_id = None;
        legacy.user_id = Some("u1".into());
        store.insert_profile(legacy).await.unwrap();

        let rows = owned_profiles(&store, "u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "legacy");
    }

    #[tokio::test]
    async fn test_fallback_on_missing_column() {
        let store = MemoryStore::new().without_auth_id_column();
        let mut legacy = profile("legacy", "u1", "Legacy");
        legacy.auth_id = None;
        legacy.user_id = Some("u1".into());
        store.insert_profile(legacy).await.unwrap();

        let preferred = preferred_profile(&store, "u1").await.unwrap();
        assert_eq!(preferred.unwrap().id, "legacy");
    }

    #[tokio::test]
    async fn test_fallback_error_propagates() {
        let result: Result<Vec<ProfileDoc>> = with_owner_fallback(|column| async move {
            match column {
                OwnerColumn::AuthId => Err(CareError::MissingField("auth_id".into())),
                OwnerColumn::UserId => Err(CareError::Database("connection reset".into())),
            }
        })
        .await;
        assert!(matches!(result, Err(CareError::Database(_))));
    }

    #[tokio::test]
    async fn test_genuine_first_error_propagates() {
        let mut calls = 0;
        let result: Result<Vec<ProfileDoc>> = with_owner_fallback(|_| {
            calls += 1;
            async { Err(CareError::Database("timeout".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_select_profile_rejects_foreign_id() {
        let store = MemoryStore::new();
        store.insert_profile(profile("mine", "u1", "Me")).await.unwrap();
        store.insert_profile(profile("theirs", "u2", "Them")).await.unwrap();

        assert!(select_profile(&store, "u1", Some("theirs")).await.unwrap().is_none());
        assert_eq!(
            select_profile(&store, "u1", None).await.unwrap().unwrap().id,
            "mine"
        );
    }
}

//! # Realtime Event Reducers
//!
//! Turn raw change-feed payloads into cache mutations.
//!
//! A payload has the shape `{eventType, new?, old?}`:
//!
//! - Anything that does not parse as that shape is ignored.
//! - `INSERT`/`UPDATE`: `new` is decoded like a fetched row. A row that fails
//!   validation is skipped.
//! - `DELETE`: the string `song_id` of `old` is evicted. No id means no-op.
//!
//! Each reducer applies its mutation under one write guard, so a single
//! payload is never observed half-applied. The only error a reducer returns
//! is a failed enrichment lookup (library rows) or a missing session for it.

use async_trait::async_trait;
use core_auth::SessionManager;
use core_library::enrich::fetch_usernames;
use core_library::{CachedEntity, Entity, LibraryEntry, LibrarySlice, SharedCache};
use core_runtime::config::TableConfig;
use core_runtime::events::{CoreEvent, EventBus};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{Result, SyncError};

/// Key column shared by every synced table
const KEY_COLUMN: &str = "song_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A parsed change-feed payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangePayload {
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl ChangePayload {
    /// `None` for anything that is not a change payload
    pub fn parse(raw: &Value) -> Option<Self> {
        serde_json::from_value(raw.clone()).ok()
    }

    /// String-typed key of the deleted row
    pub fn deleted_id(&self) -> Option<String> {
        self.old
            .as_ref()?
            .get(KEY_COLUMN)?
            .as_str()
            .map(str::to_string)
    }

    fn old_str(&self, column: &str) -> Option<&str> {
        self.old.as_ref()?.get(column)?.as_str()
    }
}

/// What a reducer did with one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReducerOutcome {
    Ignored,
    Upserted(String),
    /// Ids deleted upstream; callers drop them from the active set too
    Evicted(Vec<String>),
}

#[async_trait]
pub trait RealtimeReducer: Send + Sync {
    async fn reduce(&self, raw: &Value) -> Result<ReducerOutcome>;
}

/// Reducer for an id-keyed entity cache (public songs, private notes)
pub struct EntityReducer<T: CachedEntity> {
    cache: SharedCache<T>,
    event_bus: EventBus,
}

impl<T: CachedEntity> EntityReducer<T> {
    pub fn new(cache: SharedCache<T>, event_bus: EventBus) -> Self {
        Self { cache, event_bus }
    }

    fn upsert(&self, row: &Value) -> ReducerOutcome {
        let record = match T::decode(row) {
            Ok(record) => record,
            Err(e) => {
                debug!(kind = T::KIND, error = %e, "Skipping invalid realtime row");
                return ReducerOutcome::Ignored;
            }
        };

        let merged = self.cache.write().merge_in([record]);
        let id = merged.first().cloned().unwrap_or_default();
        let _ = self
            .event_bus
            .emit(CoreEvent::Cache(T::merged_event(merged)));
        ReducerOutcome::Upserted(id)
    }

    fn evict(&self, id: String) -> ReducerOutcome {
        let removed = self.cache.write().remove([id.as_str()]);
        if !removed.is_empty() {
            let _ = self
                .event_bus
                .emit(CoreEvent::Cache(T::evicted_event(removed)));
        }
        ReducerOutcome::Evicted(vec![id])
    }
}

#[async_trait]
impl<T: CachedEntity> RealtimeReducer for EntityReducer<T> {
    async fn reduce(&self, raw: &Value) -> Result<ReducerOutcome> {
        let Some(payload) = ChangePayload::parse(raw) else {
            return Ok(ReducerOutcome::Ignored);
        };

        let outcome = match payload.event_type {
            ChangeKind::Insert | ChangeKind::Update => match &payload.new {
                Some(row) => self.upsert(row),
                None => ReducerOutcome::Ignored,
            },
            ChangeKind::Delete => match payload.deleted_id() {
                Some(id) => self.evict(id),
                None => ReducerOutcome::Ignored,
            },
        };
        Ok(outcome)
    }
}

/// Reducer for the acting user's library rows
///
/// Rows of other users are ignored. Inserted rows get the owner's username
/// looked up before they reach the slice; a failed lookup fails the event.
pub struct LibraryReducer {
    slice: Arc<LibrarySlice>,
    sessions: Arc<SessionManager>,
    tables: TableConfig,
}

impl LibraryReducer {
    pub fn new(slice: Arc<LibrarySlice>, sessions: Arc<SessionManager>, tables: TableConfig) -> Self {
        Self {
            slice,
            sessions,
            tables,
        }
    }

    async fn upsert(&self, row: &Value) -> Result<ReducerOutcome> {
        let mut entry = match LibraryEntry::decode(row) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping invalid realtime library row");
                return Ok(ReducerOutcome::Ignored);
            }
        };

        let client = self.sessions.authorize().await?;
        if entry.user_id != client.user_id() {
            debug!(song_id = %entry.song_id, "Library row of another user ignored");
            return Ok(ReducerOutcome::Ignored);
        }

        let owners = BTreeSet::from([entry.song_owner_id.clone()]);
        let usernames = fetch_usernames(&client, &self.tables, &owners)
            .await
            .map_err(|e| SyncError::Enrichment(e.to_string()))?;
        entry.owner_username = usernames.get(&entry.song_owner_id).cloned();

        let song_id = entry.song_id.clone();
        self.slice.upsert_entry(entry);
        Ok(ReducerOutcome::Upserted(song_id))
    }

    async fn evict(&self, payload: &ChangePayload) -> Result<ReducerOutcome> {
        let Some(song_id) = payload.deleted_id() else {
            return Ok(ReducerOutcome::Ignored);
        };

        // `old` often carries only the key columns. Cached entries all belong
        // to the acting user, so the cache answers the ownership check.
        if let Some(user_id) = payload.old_str("user_id") {
            let cached_owner = self
                .slice
                .cache()
                .read()
                .get(&song_id)
                .map(|entry| entry.user_id.clone());
            if cached_owner.is_some_and(|owner| owner != user_id) {
                debug!(%song_id, "Library delete of another user ignored");
                return Ok(ReducerOutcome::Ignored);
            }
        }

        self.slice.evict(&[song_id.clone()]);
        Ok(ReducerOutcome::Evicted(vec![song_id]))
    }
}

#[async_trait]
impl RealtimeReducer for LibraryReducer {
    #[instrument(skip(self, raw))]
    async fn reduce(&self, raw: &Value) -> Result<ReducerOutcome> {
        let Some(payload) = ChangePayload::parse(raw) else {
            return Ok(ReducerOutcome::Ignored);
        };

        match payload.event_type {
            ChangeKind::Insert | ChangeKind::Update => match &payload.new {
                Some(row) => self.upsert(row).await,
                None => Ok(ReducerOutcome::Ignored),
            },
            ChangeKind::Delete => self.evict(&payload).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::{EntityCache, PrivateSong};
    use serde_json::json;

    fn private_row(id: &str) -> Value {
        json!({
            "song_id": id,
            "private_notes": "capo 3",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_parse_payload_shapes() {
        let payload = ChangePayload::parse(&json!({
            "eventType": "DELETE",
            "old": { "song_id": "s1" }
        }))
        .unwrap();
        assert_eq!(payload.event_type, ChangeKind::Delete);
        assert_eq!(payload.deleted_id().as_deref(), Some("s1"));

        assert!(ChangePayload::parse(&json!({ "eventType": "TRUNCATE" })).is_none());
        assert!(ChangePayload::parse(&json!("hello")).is_none());
        assert!(ChangePayload::parse(&json!({ "new": {} })).is_none());
    }

    #[test]
    fn test_deleted_id_must_be_a_string() {
        let payload = ChangePayload::parse(&json!({
            "eventType": "DELETE",
            "old": { "song_id": 42 }
        }))
        .unwrap();
        assert_eq!(payload.deleted_id(), None);
    }

    #[tokio::test]
    async fn test_entity_reducer_insert_update_delete() {
        let cache = EntityCache::<PrivateSong>::shared();
        let reducer = EntityReducer::new(cache.clone(), EventBus::new(8));

        let outcome = reducer
            .reduce(&json!({ "eventType": "INSERT", "new": private_row("s1") }))
            .await
            .unwrap();
        assert_eq!(outcome, ReducerOutcome::Upserted("s1".to_string()));
        assert!(cache.read().contains("s1"));

        let mut updated = private_row("s1");
        updated["private_notes"] = json!("capo 5");
        reducer
            .reduce(&json!({ "eventType": "UPDATE", "new": updated, "old": { "song_id": "s1" } }))
            .await
            .unwrap();
        assert_eq!(
            cache.read().get("s1").unwrap().private_notes.as_deref(),
            Some("capo 5")
        );

        let outcome = reducer
            .reduce(&json!({ "eventType": "DELETE", "old": { "song_id": "s1" } }))
            .await
            .unwrap();
        assert_eq!(outcome, ReducerOutcome::Evicted(vec!["s1".to_string()]));
        assert!(cache.read().is_empty());
    }

    #[tokio::test]
    async fn test_entity_reducer_ignores_bad_input() {
        let cache = EntityCache::<PrivateSong>::shared();
        let reducer = EntityReducer::new(cache.clone(), EventBus::new(8));

        for raw in [
            json!({ "eventType": "INSERT", "new": { "song_id": "s1" } }),
            json!({ "eventType": "INSERT" }),
            json!({ "eventType": "DELETE", "old": {} }),
            json!({ "unexpected": true }),
        ] {
            assert_eq!(reducer.reduce(&raw).await.unwrap(), ReducerOutcome::Ignored);
        }
        assert!(cache.read().is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_unknown_id_is_a_no_op() {
        let cache = EntityCache::<PrivateSong>::shared();
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let reducer = EntityReducer::new(cache, bus);

        let outcome = reducer
            .reduce(&json!({ "eventType": "DELETE", "old": { "song_id": "ghost" } }))
            .await
            .unwrap();

        assert_eq!(outcome, ReducerOutcome::Evicted(vec!["ghost".to_string()]));
        assert!(events.try_recv().is_err());
    }
}

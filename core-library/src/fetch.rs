//! # Fetch-and-Merge Pipeline
//!
//! Loads entity rows for newly active ids and merges them into the caches.
//!
//! ## Algorithm
//!
//! 1. Work out which keys to request. Id-keyed fetches always request the
//!    full set, since cached rows may be stale. Slug-keyed fetches only
//!    request slugs the cache cannot resolve yet.
//! 2. Acquire an auth-scoped client; fail fast with `LibraryError::Auth`.
//! 3. One batched `in` query per call, never one request per id.
//! 4. Decode every row; rows that fail validation are logged and skipped.
//! 5. Merge the decoded rows and publish a [`CacheEvent`].
//!
//! Transport, auth and non-2xx failures are returned to the caller. Nothing
//! is retried.

use bridge_traits::{Filter, SelectQuery};
use core_auth::SessionManager;
use core_runtime::config::TableConfig;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CachedEntity, SharedCache};
use crate::enrich::select_rows;
use crate::error::Result;
use crate::models::{PrivateSong, Song};

/// Outcome of one fetch call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Keys sent to the backend (0 when nothing was missing)
    pub requested: usize,
    /// Cache keys merged
    pub merged: Vec<String>,
    /// Rows dropped by validation
    pub skipped: usize,
}

pub struct FetchPipeline {
    sessions: Arc<SessionManager>,
    tables: TableConfig,
    songs: SharedCache<Song>,
    private_songs: SharedCache<PrivateSong>,
    event_bus: EventBus,
}

impl FetchPipeline {
    pub fn new(
        sessions: Arc<SessionManager>,
        tables: TableConfig,
        songs: SharedCache<Song>,
        private_songs: SharedCache<PrivateSong>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            sessions,
            tables,
            songs,
            private_songs,
            event_bus,
        }
    }

    pub fn songs(&self) -> &SharedCache<Song> {
        &self.songs
    }

    pub fn private_songs(&self) -> &SharedCache<PrivateSong> {
        &self.private_songs
    }

    /// Fetch public songs by id. Always requests the whole set.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn fetch_songs_by_ids(&self, ids: &[String]) -> Result<FetchReport> {
        let table = self.tables.song_public.clone();
        self.fetch_rows(&table, "song_id", dedup(ids), &self.songs)
            .await
    }

    /// Fetch public songs by slug. Only slugs missing from the cache are
    /// requested.
    #[instrument(skip(self, slugs), fields(count = slugs.len()))]
    pub async fn fetch_songs_by_slugs(&self, slugs: &[String]) -> Result<FetchReport> {
        let missing = self.songs.read().missing_slugs(slugs);
        if missing.is_empty() {
            debug!("All slugs already cached");
            return Ok(FetchReport::default());
        }

        let table = self.tables.song_public.clone();
        self.fetch_rows(&table, "song_slug", missing, &self.songs)
            .await
    }

    /// Fetch private notes by song id
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn fetch_private_songs(&self, ids: &[String]) -> Result<FetchReport> {
        let table = self.tables.song.clone();
        self.fetch_rows(&table, "song_id", dedup(ids), &self.private_songs)
            .await
    }

    async fn fetch_rows<T: CachedEntity>(
        &self,
        table: &str,
        column: &str,
        keys: Vec<String>,
        cache: &SharedCache<T>,
    ) -> Result<FetchReport> {
        if keys.is_empty() {
            return Ok(FetchReport::default());
        }

        let requested = keys.len();
        let client = self.sessions.authorize().await?;

        let query = SelectQuery::new(table, T::COLUMNS).filter(Filter::in_list(column, keys));
        let rows = select_rows(&client, query).await?;

        let mut records = Vec::with_capacity(rows.len());
        let mut skipped = 0;
        for row in &rows {
            match T::decode(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(kind = T::KIND, error = %e, "Skipping invalid row");
                }
            }
        }

        let merged = cache.write().merge_in(records);

        info!(
            kind = T::KIND,
            requested,
            merged = merged.len(),
            skipped,
            "Fetch merged"
        );

        if !merged.is_empty() {
            let _ = self
                .event_bus
                .emit(CoreEvent::Cache(T::merged_event(merged.clone())));
        }
        if skipped > 0 {
            let _ = self.event_bus.emit(CoreEvent::Cache(CacheEvent::RecordsSkipped {
                entity: T::KIND.to_string(),
                count: skipped,
            }));
        }

        Ok(FetchReport {
            requested,
            merged,
            skipped,
        })
    }
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

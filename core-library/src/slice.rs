//! # Library Slice
//!
//! The ownership library: which songs the acting user has added to their
//! library, with add/remove commands and a bulk reload.
//!
//! ## Overview
//!
//! The slice owns the [`LibraryCache`](crate::cache::LibraryCache) plus two
//! pieces of user-visible state: a `loading` flag and the last error
//! message. Every command:
//!
//! 1. clears the previous error,
//! 2. validates its request,
//! 3. short-circuits when membership already matches (no network at all),
//! 4. talks to the backend, and
//! 5. applies the local change only after the backend accepted it.
//!
//! Any failure is returned to the caller *and* stored as the slice error.
//! There is no compensating rollback: the local change is simply never made.
//! Local changes go through [`LibrarySlice::apply_local`], the single place
//! where a stricter rollback mode would hook in.

use bridge_traits::{Filter, SelectQuery};
use core_auth::SessionManager;
use core_runtime::config::TableConfig;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{SharedCache, SharedLibraryCache};
use crate::enrich::{apply_display_fields, fetch_song_titles, fetch_usernames, json_kind, select_rows};
use crate::error::{LibraryError, Result};
use crate::models::{Entity, LibraryEntry, Song};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddToLibraryRequest {
    pub song_id: String,
    pub song_owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveFromLibraryRequest {
    pub song_id: String,
}

/// Whether a command changed membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Applied,
    /// Membership already matched; nothing was sent
    Unchanged,
}

/// A local cache mutation applied after the backend accepted the command
#[derive(Debug, Clone)]
enum LocalMutation {
    Insert(LibraryEntry),
    Remove(String),
}

#[derive(Debug, Default)]
struct SliceState {
    loading: bool,
    error: Option<String>,
}

pub struct LibrarySlice {
    sessions: Arc<SessionManager>,
    tables: TableConfig,
    cache: SharedLibraryCache,
    songs: SharedCache<Song>,
    state: RwLock<SliceState>,
    event_bus: EventBus,
}

impl LibrarySlice {
    /// `songs` is only read, to attach song display fields opportunistically
    pub fn new(
        sessions: Arc<SessionManager>,
        tables: TableConfig,
        cache: SharedLibraryCache,
        songs: SharedCache<Song>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            sessions,
            tables,
            cache,
            songs,
            state: RwLock::new(SliceState::default()),
            event_bus,
        }
    }

    // -------------------------------------------------------------------------
    // Selectors
    // -------------------------------------------------------------------------

    pub fn is_member(&self, song_id: &str) -> bool {
        self.cache.read().is_member(song_id)
    }

    pub fn entries(&self) -> Vec<LibraryEntry> {
        self.cache.read().entries()
    }

    pub fn song_ids(&self) -> BTreeSet<String> {
        self.cache.read().song_ids()
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    pub fn cache(&self) -> &SharedLibraryCache {
        &self.cache
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Add a song to the acting user's library.
    #[instrument(skip(self, request), fields(song_id = %request.song_id))]
    pub async fn add_to_library(&self, request: AddToLibraryRequest) -> Result<MembershipChange> {
        self.clear_error();
        let result = self.try_add(request).await;
        self.record_failure(result)
    }

    async fn try_add(&self, request: AddToLibraryRequest) -> Result<MembershipChange> {
        require_non_empty("song_id", &request.song_id)?;
        require_non_empty("song_owner_id", &request.song_owner_id)?;

        if self.is_member(&request.song_id) {
            debug!("Song already in library; nothing to do");
            return Ok(MembershipChange::Unchanged);
        }

        let client = self.sessions.authorize().await?;
        let row = LibraryEntry::insert_row(&request.song_id, &request.song_owner_id, client.user_id());
        let response = client.insert(&self.tables.song_library, row).await?;

        if !response.is_success() {
            return Err(LibraryError::from_response(&response));
        }

        let entry = inserted_entry(&response.body)?;
        self.apply_local(LocalMutation::Insert(entry));
        info!("Song added to library");
        Ok(MembershipChange::Applied)
    }

    /// Remove a song from the acting user's library.
    #[instrument(skip(self, request), fields(song_id = %request.song_id))]
    pub async fn remove_from_library(
        &self,
        request: RemoveFromLibraryRequest,
    ) -> Result<MembershipChange> {
        self.clear_error();
        let result = self.try_remove(request).await;
        self.record_failure(result)
    }

    async fn try_remove(&self, request: RemoveFromLibraryRequest) -> Result<MembershipChange> {
        require_non_empty("song_id", &request.song_id)?;

        if !self.is_member(&request.song_id) {
            debug!("Song not in library; nothing to do");
            return Ok(MembershipChange::Unchanged);
        }

        let client = self.sessions.authorize().await?;
        let filters = vec![
            Filter::eq("song_id", request.song_id.as_str()),
            Filter::eq("user_id", client.user_id()),
        ];
        let response = client.delete(&self.tables.song_library, filters).await?;

        if !response.is_success() {
            return Err(LibraryError::from_response(&response));
        }

        self.apply_local(LocalMutation::Remove(request.song_id));
        info!("Song removed from library");
        Ok(MembershipChange::Applied)
    }

    /// Reload the acting user's whole library and join in display fields.
    ///
    /// Returns the number of entries loaded.
    #[instrument(skip(self))]
    pub async fn fetch_library(&self) -> Result<usize> {
        self.clear_error();
        let _loading = LoadingGuard::enter(&self.state, &self.event_bus);
        let result = self.try_fetch_library().await;
        self.record_failure(result)
    }

    async fn try_fetch_library(&self) -> Result<usize> {
        let client = self.sessions.authorize().await?;

        let query = SelectQuery::new(&self.tables.song_library, LibraryEntry::COLUMNS)
            .filter(Filter::eq("user_id", client.user_id()));
        let rows = select_rows(&client, query).await?;

        let mut entries: Vec<LibraryEntry> = rows
            .iter()
            .filter_map(|row| match LibraryEntry::decode(row) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid library row");
                    None
                }
            })
            .collect();

        let song_ids: BTreeSet<String> = entries.iter().map(|e| e.song_id.clone()).collect();
        let owner_ids: BTreeSet<String> = entries.iter().map(|e| e.song_owner_id.clone()).collect();

        let titles = fetch_song_titles(&client, &self.tables, &song_ids).await?;
        let usernames = fetch_usernames(&client, &self.tables, &owner_ids).await?;

        for entry in &mut entries {
            apply_display_fields(entry, &usernames, &titles);
        }

        let count = entries.len();
        self.cache.write().replace_all(entries);
        self.emit(LibraryEvent::Replaced { count });

        info!(count, "Library loaded");
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Realtime hooks
    // -------------------------------------------------------------------------

    /// Insert or replace an entry. Song display fields missing from the
    /// entry are filled from the song cache when it has the song.
    pub fn upsert_entry(&self, mut entry: LibraryEntry) {
        if entry.song_name.is_none() {
            self.attach_cached_song_fields(&mut entry);
        }
        let song_id = entry.song_id.clone();
        self.cache.write().insert(entry);
        self.emit(LibraryEvent::EntryAdded { song_id });
    }

    /// Evict entries deleted upstream. Returns the ids that were members.
    pub fn evict(&self, song_ids: &[String]) -> Vec<String> {
        let removed: Vec<String> = {
            let mut cache = self.cache.write();
            song_ids
                .iter()
                .filter(|id| cache.remove(id).is_some())
                .cloned()
                .collect()
        };
        for song_id in &removed {
            self.emit(LibraryEvent::EntryRemoved {
                song_id: song_id.clone(),
            });
        }
        removed
    }

    // -------------------------------------------------------------------------
    // State helpers
    // -------------------------------------------------------------------------

    /// Apply a backend-accepted change to the local cache.
    ///
    /// No compensating rollback exists; callers only get here after the
    /// backend mutation succeeded.
    fn apply_local(&self, mutation: LocalMutation) {
        match mutation {
            LocalMutation::Insert(entry) => self.upsert_entry(entry),
            LocalMutation::Remove(song_id) => {
                self.evict(&[song_id]);
            }
        }
    }

    fn attach_cached_song_fields(&self, entry: &mut LibraryEntry) {
        if let Some(song) = self.songs.read().get(&entry.song_id) {
            entry.song_name = Some(song.song_name.clone());
            entry.song_slug = Some(song.song_slug.clone());
        }
    }

    fn clear_error(&self) {
        let previous = self.state.write().error.take();
        if previous.is_some() {
            self.emit(LibraryEvent::ErrorChanged { message: None });
        }
    }

    fn set_error(&self, message: String) {
        self.state.write().error = Some(message.clone());
        self.emit(LibraryEvent::ErrorChanged {
            message: Some(message),
        });
    }

    fn record_failure<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(error = %e, "Library command failed");
            self.set_error(e.to_string());
        }
        result
    }

    fn emit(&self, event: LibraryEvent) {
        let _ = self.event_bus.emit(CoreEvent::Library(event));
    }
}

/// Sets `loading` on creation and clears it on drop, on every exit path.
struct LoadingGuard<'a> {
    state: &'a RwLock<SliceState>,
    event_bus: &'a EventBus,
}

impl<'a> LoadingGuard<'a> {
    fn enter(state: &'a RwLock<SliceState>, event_bus: &'a EventBus) -> Self {
        state.write().loading = true;
        let _ = event_bus.emit(CoreEvent::Library(LibraryEvent::LoadingChanged { loading: true }));
        Self { state, event_bus }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.write().loading = false;
        let _ = self
            .event_bus
            .emit(CoreEvent::Library(LibraryEvent::LoadingChanged { loading: false }));
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LibraryError::InvalidInput {
            field: field.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}

/// The inserted row, from a `return=representation` body (array or object)
fn inserted_entry(body: &Value) -> Result<LibraryEntry> {
    let row = match body {
        Value::Array(rows) => rows.first().ok_or_else(|| {
            LibraryError::InvalidResponse("insert returned no rows".to_string())
        })?,
        Value::Object(_) => body,
        other => {
            return Err(LibraryError::InvalidResponse(format!(
                "expected the inserted row, got {}",
                json_kind(other)
            )))
        }
    };

    LibraryEntry::from_row(row)
        .map_err(|e| LibraryError::InvalidResponse(format!("inserted row is malformed: {}", e)))
}

//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host-provided bridges (backend client, change feed,
//! session provider) into the songbook core and exposes the API the
//! presentation layer talks to. Desktop apps typically enable the
//! `desktop-shims` feature, which lets [`CoreConfig`] default the backend to
//! `bridge-desktop`'s REST client.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::SongbookService;
//!
//! let config = CoreConfig::builder()
//!     .rest_endpoint("https://example.supabase.co", "anon-key")
//!     .change_feed(realtime)
//!     .token_provider(session)
//!     .build()?;
//! let service = SongbookService::new(config)?;
//!
//! // Returns immediately; fetch and subscribe run in the background
//! service.add_active_ids(["song-1"]);
//! ```

pub mod error;

pub use error::{CoreError, Result};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{RestBackendClient, StaticTokenProvider};

use core_auth::SessionManager;
use core_library::{
    AddToLibraryRequest, EntityCache, FetchPipeline, FetchReport, LibraryCache, LibraryEntry,
    LibrarySlice, MembershipChange, PrivateSong, RegistryKind, RemoveFromLibraryRequest,
    SharedCache, Song,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use core_sync::{ActiveSet, EntityReducer, LibraryReducer, PendingSync, SubscriptionStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A command result plus the background work it scheduled
#[derive(Debug)]
pub struct Scheduled<T> {
    pub value: T,
    pub pending: PendingSync,
}

impl<T> Scheduled<T> {
    /// Wait for the scheduled work, then hand back the value
    pub async fn settled(self) -> T {
        self.pending.settle().await;
        self.value
    }
}

/// Primary façade exposed to host applications.
pub struct SongbookService {
    event_bus: EventBus,
    pipeline: Arc<FetchPipeline>,
    library: Arc<LibrarySlice>,
    public_songs: Arc<ActiveSet>,
    private_songs: Arc<ActiveSet>,
    library_songs: Arc<ActiveSet>,
}

impl SongbookService {
    /// Validate the configuration and assemble caches, registries and
    /// subscription slots. No network traffic happens here.
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let tables = config.tables.clone();
        let event_bus = EventBus::new(config.event_buffer_size);
        let sessions = Arc::new(
            SessionManager::new(
                config.token_provider.clone(),
                config.backend.clone(),
                config.change_feed.clone(),
                event_bus.clone(),
            )
            .with_token_timeout(config.auth_timeout),
        );

        let songs: SharedCache<Song> = EntityCache::shared();
        let private_cache: SharedCache<PrivateSong> = EntityCache::shared();

        let pipeline = Arc::new(FetchPipeline::new(
            sessions.clone(),
            tables.clone(),
            songs.clone(),
            private_cache.clone(),
            event_bus.clone(),
        ));

        let library = Arc::new(LibrarySlice::new(
            sessions.clone(),
            tables.clone(),
            LibraryCache::shared(),
            songs.clone(),
            event_bus.clone(),
        ));

        let public_songs = ActiveSet::new(
            RegistryKind::PublicSongs,
            &tables,
            sessions.clone(),
            Some(pipeline.clone()),
            Arc::new(EntityReducer::new(songs, event_bus.clone())),
            event_bus.clone(),
        );
        let private_songs = ActiveSet::new(
            RegistryKind::PrivateSongs,
            &tables,
            sessions.clone(),
            Some(pipeline.clone()),
            Arc::new(EntityReducer::new(private_cache, event_bus.clone())),
            event_bus.clone(),
        );
        let library_songs = ActiveSet::new(
            RegistryKind::Library,
            &tables,
            sessions.clone(),
            None,
            Arc::new(LibraryReducer::new(library.clone(), sessions, tables.clone())),
            event_bus.clone(),
        );

        info!("Songbook core initialized");

        Ok(Self {
            event_bus,
            pipeline,
            library,
            public_songs,
            private_songs,
            library_songs,
        })
    }

    // -------------------------------------------------------------------------
    // Active sets
    // -------------------------------------------------------------------------

    /// Mark public songs as needed: fetch them and keep them live.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_active_ids<I, S>(&self, ids: I) -> PendingSync
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.public_songs.add_ids(ids)
    }

    pub fn remove_active_ids<I, S>(&self, ids: I) -> PendingSync
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.public_songs.remove_ids(ids)
    }

    /// Mark private notes as needed (the acting user's own songs)
    pub fn add_active_private_ids<I, S>(&self, ids: I) -> PendingSync
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.private_songs.add_ids(ids)
    }

    pub fn remove_active_private_ids<I, S>(&self, ids: I) -> PendingSync
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.private_songs.remove_ids(ids)
    }

    /// Resolve slugs the cache does not know yet, then activate their ids.
    ///
    /// Slugs the backend does not know are dropped silently.
    #[instrument(skip(self, slugs), fields(count = slugs.len()))]
    pub async fn add_active_slugs(&self, slugs: &[String]) -> Result<PendingSync> {
        self.pipeline.fetch_songs_by_slugs(slugs).await?;

        let ids: Vec<String> = {
            let songs = self.pipeline.songs().read();
            slugs
                .iter()
                .filter_map(|slug| songs.find_by_slug(slug).map(|song| song.song_id.clone()))
                .collect()
        };

        debug!(resolved = ids.len(), "Slugs resolved");
        if ids.is_empty() {
            return Ok(PendingSync::default());
        }
        Ok(self.public_songs.add_ids(ids))
    }

    /// Fetch public songs by id and wait for the result
    pub async fn fetch_missing(&self, ids: &[String]) -> Result<FetchReport> {
        Ok(self.pipeline.fetch_songs_by_ids(ids).await?)
    }

    pub fn active_ids(&self, kind: RegistryKind) -> BTreeSet<String> {
        self.set(kind).ids()
    }

    pub fn subscription_status(&self, kind: RegistryKind) -> SubscriptionStatus {
        self.set(kind).status()
    }

    // -------------------------------------------------------------------------
    // Library
    // -------------------------------------------------------------------------

    /// Reload the library; the library channel follows the new membership
    pub async fn fetch_library(&self) -> Result<Scheduled<usize>> {
        let count = self.library.fetch_library().await?;
        Ok(self.with_library_sync(count))
    }

    pub async fn add_to_library(
        &self,
        request: AddToLibraryRequest,
    ) -> Result<Scheduled<MembershipChange>> {
        let change = self.library.add_to_library(request).await?;
        Ok(self.with_library_sync(change))
    }

    pub async fn remove_from_library(
        &self,
        request: RemoveFromLibraryRequest,
    ) -> Result<Scheduled<MembershipChange>> {
        let change = self.library.remove_from_library(request).await?;
        Ok(self.with_library_sync(change))
    }

    pub fn is_member(&self, song_id: &str) -> bool {
        self.library.is_member(song_id)
    }

    pub fn library_entries(&self) -> Vec<LibraryEntry> {
        self.library.entries()
    }

    /// Message of the last failed library command, cleared by the next one
    pub fn library_error(&self) -> Option<String> {
        self.library.error()
    }

    pub fn is_library_loading(&self) -> bool {
        self.library.is_loading()
    }

    // -------------------------------------------------------------------------
    // Selectors
    // -------------------------------------------------------------------------

    pub fn get_by_id(&self, song_id: &str) -> Option<Song> {
        self.pipeline.songs().read().get(song_id).cloned()
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<Song> {
        self.pipeline.songs().read().find_by_slug(slug).cloned()
    }

    pub fn get_private_notes(&self, song_id: &str) -> Option<String> {
        self.pipeline
            .private_songs()
            .read()
            .get(song_id)
            .and_then(|song| song.private_notes.clone())
    }

    // -------------------------------------------------------------------------
    // Events and lifecycle
    // -------------------------------------------------------------------------

    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Close every channel and clear the active sets. Caches are kept.
    pub fn shutdown(&self) {
        for set in [&self.public_songs, &self.private_songs, &self.library_songs] {
            set.shutdown();
        }
        info!("Songbook core shut down");
    }

    fn set(&self, kind: RegistryKind) -> &Arc<ActiveSet> {
        match kind {
            RegistryKind::PublicSongs => &self.public_songs,
            RegistryKind::PrivateSongs => &self.private_songs,
            RegistryKind::Library => &self.library_songs,
        }
    }

    fn with_library_sync<T>(&self, value: T) -> Scheduled<T> {
        let pending = self.library_songs.replace_ids(self.library.song_ids());
        Scheduled { value, pending }
    }
}

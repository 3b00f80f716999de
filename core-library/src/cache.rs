//! In-memory entity caches
//!
//! Pure data containers. [`EntityCache::merge_in`] only ever adds or
//! replaces; entries leave a cache through explicit [`EntityCache::remove`]
//! calls (delete events, delete mutations) and nothing else.
//!
//! The caches are shared between the fetch pipeline, the realtime reducers
//! and the selectors behind a `parking_lot::RwLock`. Guards are taken for a
//! single read or write and never held across an `.await`.

use core_runtime::events::CacheEvent;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::models::{Entity, LibraryEntry, PrivateSong, Song};

pub type SharedCache<T> = Arc<RwLock<EntityCache<T>>>;
pub type SharedLibraryCache = Arc<RwLock<LibraryCache>>;

/// Map from id to validated record
#[derive(Debug, Clone)]
pub struct EntityCache<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Default for EntityCache<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: Entity> EntityCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache<T> {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Insert or replace each record under its key. Returns the merged keys.
    pub fn merge_in<I>(&mut self, records: I) -> Vec<String>
    where
        I: IntoIterator<Item = T>,
    {
        records
            .into_iter()
            .map(|record| {
                let key = record.cache_key().to_string();
                self.entries.insert(key.clone(), record);
                key
            })
            .collect()
    }

    /// Evict the given ids. Returns the ids that were actually present.
    pub fn remove<'a, I>(&mut self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ids.into_iter()
            .filter(|id| self.entries.remove(*id).is_some())
            .map(str::to_string)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EntityCache<Song> {
    pub fn find_by_slug(&self, slug: &str) -> Option<&Song> {
        self.entries.values().find(|song| song.song_slug == slug)
    }

    /// Slugs with no cached song, in request order, deduplicated.
    pub fn missing_slugs(&self, slugs: &[String]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        slugs
            .iter()
            .filter(|slug| self.find_by_slug(slug).is_none())
            .filter(|slug| seen.insert(slug.as_str()))
            .cloned()
            .collect()
    }
}

/// Event constructors for caches that publish their changes
pub trait CachedEntity: Entity {
    fn merged_event(ids: Vec<String>) -> CacheEvent;
    fn evicted_event(ids: Vec<String>) -> CacheEvent;
}

impl CachedEntity for Song {
    fn merged_event(song_ids: Vec<String>) -> CacheEvent {
        CacheEvent::SongsMerged { song_ids }
    }

    fn evicted_event(song_ids: Vec<String>) -> CacheEvent {
        CacheEvent::SongsEvicted { song_ids }
    }
}

impl CachedEntity for PrivateSong {
    fn merged_event(song_ids: Vec<String>) -> CacheEvent {
        CacheEvent::PrivateSongsMerged { song_ids }
    }

    fn evicted_event(song_ids: Vec<String>) -> CacheEvent {
        CacheEvent::PrivateSongsEvicted { song_ids }
    }
}

/// Ownership records keyed by `song_id`
#[derive(Debug, Clone, Default)]
pub struct LibraryCache {
    entries: BTreeMap<String, LibraryEntry>,
}

impl LibraryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedLibraryCache {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Insert or replace. Returns `true` when the song was not a member yet.
    pub fn insert(&mut self, entry: LibraryEntry) -> bool {
        self.entries.insert(entry.song_id.clone(), entry).is_none()
    }

    pub fn remove(&mut self, song_id: &str) -> Option<LibraryEntry> {
        self.entries.remove(song_id)
    }

    /// Drop everything and load `entries` instead
    pub fn replace_all<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = LibraryEntry>,
    {
        self.entries = entries
            .into_iter()
            .map(|entry| (entry.song_id.clone(), entry))
            .collect();
    }

    pub fn is_member(&self, song_id: &str) -> bool {
        self.entries.contains_key(song_id)
    }

    pub fn get(&self, song_id: &str) -> Option<&LibraryEntry> {
        self.entries.get(song_id)
    }

    pub fn entries(&self) -> Vec<LibraryEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn song_ids(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn song(id: &str, slug: &str) -> Song {
        Song {
            song_id: id.to_string(),
            song_name: id.to_uppercase(),
            song_slug: slug.to_string(),
            slide_order: vec![],
            slides: BTreeMap::new(),
            fields: vec![],
            user_id: "u1".to_string(),
            short_credit: None,
            long_credit: None,
            public_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn entry(id: &str) -> LibraryEntry {
        LibraryEntry {
            song_id: id.to_string(),
            song_owner_id: "owner".to_string(),
            user_id: "me".to_string(),
            created_at: Utc::now(),
            owner_username: None,
            song_name: None,
            song_slug: None,
        }
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let mut cache = EntityCache::new();
        cache.merge_in([song("a", "a")]);
        let before = cache.keys();

        assert!(cache.merge_in(Vec::<Song>::new()).is_empty());
        assert_eq!(cache.keys(), before);
    }

    #[test]
    fn test_merge_never_removes() {
        let mut cache = EntityCache::new();
        cache.merge_in([song("a", "a"), song("b", "b")]);
        cache.merge_in([song("b", "b-2")]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b").unwrap().song_slug, "b-2");
        assert!(cache.contains("a"));
    }

    #[test]
    fn test_remove_reports_present_ids() {
        let mut cache = EntityCache::new();
        cache.merge_in([song("a", "a")]);

        assert_eq!(cache.remove(["a", "zzz"]), vec!["a"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_slugs() {
        let mut cache = EntityCache::new();
        cache.merge_in([song("a", "amazing-grace")]);

        let slugs = vec![
            "amazing-grace".to_string(),
            "be-thou".to_string(),
            "be-thou".to_string(),
        ];
        assert_eq!(cache.missing_slugs(&slugs), vec!["be-thou"]);
        assert_eq!(cache.find_by_slug("amazing-grace").unwrap().song_id, "a");
    }

    #[test]
    fn test_library_cache_membership() {
        let mut library = LibraryCache::new();
        assert!(library.insert(entry("s1")));
        assert!(!library.insert(entry("s1")));
        assert!(library.is_member("s1"));

        library.replace_all([entry("s2"), entry("s3")]);
        assert!(!library.is_member("s1"));
        assert_eq!(library.song_ids().len(), 2);

        assert!(library.remove("s2").is_some());
        assert!(library.remove("s2").is_none());
    }
}

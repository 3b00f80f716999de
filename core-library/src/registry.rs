//! Active-ID registries
//!
//! The working set of ids the presentation layer currently needs live data
//! for, one set per [`RegistryKind`]. [`ActiveIdRegistry::add`] and
//! [`ActiveIdRegistry::remove`] are pure: they compute the next set and leave
//! the registry alone. The caller installs it with [`ActiveIdRegistry::set`]
//! and triggers fetch and resubscribe itself.

use core_runtime::config::TableConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which registry, cache and change-feed table an operation is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    PublicSongs,
    PrivateSongs,
    Library,
}

impl RegistryKind {
    pub const ALL: [RegistryKind; 3] = [
        RegistryKind::PublicSongs,
        RegistryKind::PrivateSongs,
        RegistryKind::Library,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::PublicSongs => "public_songs",
            RegistryKind::PrivateSongs => "private_songs",
            RegistryKind::Library => "library",
        }
    }

    /// Table whose changes this registry listens to
    pub fn table<'a>(&self, tables: &'a TableConfig) -> &'a str {
        match self {
            RegistryKind::PublicSongs => &tables.song_public,
            RegistryKind::PrivateSongs => &tables.song,
            RegistryKind::Library => &tables.song_library,
        }
    }

    /// Column the channel filter is expressed on
    pub fn filter_column(&self) -> &'static str {
        "song_id"
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveIdRegistry {
    ids: BTreeSet<String>,
}

impl ActiveIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `existing ∪ ids`
    pub fn add<I, S>(&self, ids: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.ids.clone();
        next.extend(ids.into_iter().map(Into::into));
        next
    }

    /// `existing \ ids`
    pub fn remove<I, S>(&self, ids: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.ids.clone();
        for id in ids {
            next.remove(id.as_ref());
        }
        next
    }

    /// Install `ids`. Returns `true` when the set changed.
    pub fn set(&mut self, ids: BTreeSet<String>) -> bool {
        if self.ids == ids {
            return false;
        }
        self.ids = ids;
        true
    }

    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

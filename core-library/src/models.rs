//! Domain models for the songbook
//!
//! Typed records decoded from backend rows, plus the [`Entity`] trait the
//! caches and the fetch pipeline are generic over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::validation::{
    check_song_invariants, normalize_song_row, parse_slides, RowReader, ValidationError,
};

// =============================================================================
// Entity trait
// =============================================================================

/// A record that can be decoded from a backend row and cached by id.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Short name used in logs and events
    const KIND: &'static str;
    /// `select=` list for bulk queries
    const COLUMNS: &'static str;

    fn cache_key(&self) -> &str;

    /// Strict decoding
    fn from_row(row: &Value) -> Result<Self, ValidationError>;

    /// Lenient decoding, tried only after [`from_row`](Entity::from_row)
    /// fails. No leniency by default.
    fn normalize_row(row: &Value) -> Result<Self, ValidationError> {
        Self::from_row(row)
    }

    /// Strict first, then lenient. The strict error is reported when both fail.
    fn decode(row: &Value) -> Result<Self, ValidationError> {
        match Self::from_row(row) {
            Ok(entity) => Ok(entity),
            Err(strict) => match Self::normalize_row(row) {
                Ok(entity) => {
                    debug!(kind = Self::KIND, id = entity.cache_key(), error = %strict, "Row normalized");
                    Ok(entity)
                }
                Err(_) => Err(strict),
            },
        }
    }
}

// =============================================================================
// Public song
// =============================================================================

/// One slide: display name plus a value per enabled field (e.g. per language)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub slide_name: String,
    pub field_data: BTreeMap<String, String>,
}

/// Public song document (`song_public`), realtime-synced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub song_id: String,
    pub song_name: String,
    /// URL-safe, unique-ish
    pub song_slug: String,
    pub slide_order: Vec<String>,
    pub slides: BTreeMap<String, Slide>,
    /// Enabled field names
    pub fields: Vec<String>,
    /// Owner
    pub user_id: String,
    pub short_credit: Option<String>,
    pub long_credit: Option<String>,
    pub public_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Song {
    /// Slides in display order, skipping order entries with no slide
    pub fn ordered_slides(&self) -> impl Iterator<Item = (&str, &Slide)> {
        self.slide_order
            .iter()
            .filter_map(|id| self.slides.get(id).map(|slide| (id.as_str(), slide)))
    }
}

impl Entity for Song {
    const KIND: &'static str = "song";
    const COLUMNS: &'static str = "*";

    fn cache_key(&self) -> &str {
        &self.song_id
    }

    fn from_row(row: &Value) -> Result<Self, ValidationError> {
        let reader = RowReader::new(row)?;

        let song = Song {
            song_id: reader.required_str("song_id")?,
            song_name: reader.required_str("song_name")?,
            song_slug: reader.required_str("song_slug")?,
            slide_order: reader.string_list("slide_order")?,
            slides: parse_slides(reader.object("slides")?)?,
            fields: reader.string_list("fields")?,
            user_id: reader.required_str("user_id")?,
            short_credit: reader.optional_str("short_credit")?,
            long_credit: reader.optional_str("long_credit")?,
            public_notes: reader.optional_str("public_notes")?,
            created_at: reader.timestamp("created_at")?,
            updated_at: reader.timestamp("updated_at")?,
        };

        check_song_invariants(&song)?;
        Ok(song)
    }

    fn normalize_row(row: &Value) -> Result<Self, ValidationError> {
        normalize_song_row(row)
    }
}

// =============================================================================
// Private song
// =============================================================================

/// Private notes on a song (`song`), not realtime-synced by default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateSong {
    pub song_id: String,
    pub private_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for PrivateSong {
    const KIND: &'static str = "private_song";
    const COLUMNS: &'static str = "song_id, private_notes, created_at, updated_at";

    fn cache_key(&self) -> &str {
        &self.song_id
    }

    fn from_row(row: &Value) -> Result<Self, ValidationError> {
        let reader = RowReader::new(row)?;
        Ok(PrivateSong {
            song_id: reader.required_str("song_id")?,
            private_notes: reader.optional_str("private_notes")?,
            created_at: reader.timestamp("created_at")?,
            updated_at: reader.timestamp("updated_at")?,
        })
    }
}

// =============================================================================
// Library entry
// =============================================================================

/// Ownership record (`song_library`)
///
/// `owner_username`, `song_name` and `song_slug` are denormalized display
/// fields. They are attached when a join or enrichment finds a match and
/// are otherwise `None`; they are never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub song_id: String,
    pub song_owner_id: String,
    /// Acting user
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub owner_username: Option<String>,
    #[serde(default)]
    pub song_name: Option<String>,
    #[serde(default)]
    pub song_slug: Option<String>,
}

impl LibraryEntry {
    /// Row for an insert mutation; denormalized fields are not columns
    pub fn insert_row(song_id: &str, song_owner_id: &str, user_id: &str) -> Value {
        json!({
            "song_id": song_id,
            "song_owner_id": song_owner_id,
            "user_id": user_id,
        })
    }
}

impl Entity for LibraryEntry {
    const KIND: &'static str = "library_entry";
    const COLUMNS: &'static str = "song_id, song_owner_id, user_id, created_at";

    fn cache_key(&self) -> &str {
        &self.song_id
    }

    fn from_row(row: &Value) -> Result<Self, ValidationError> {
        let reader = RowReader::new(row)?;
        Ok(LibraryEntry {
            song_id: reader.required_str("song_id")?,
            song_owner_id: reader.required_str("song_owner_id")?,
            user_id: reader.required_str("user_id")?,
            created_at: reader.timestamp("created_at")?,
            owner_username: reader.optional_str("owner_username")?,
            song_name: reader.optional_str("song_name")?,
            song_slug: reader.optional_str("song_slug")?,
        })
    }
}

//! Schema validation for raw backend rows
//!
//! Rows arrive as untyped JSON, from bulk queries and from change-feed
//! payloads alike. [`RowReader`] does the primitive shape checks (required
//! strings, nullable optional columns, timestamps, string lists); the
//! cross-field song invariants live in [`check_song_invariants`].
//!
//! Strict decoding is tried first. Song rows that fail it get one lenient
//! pass, [`normalize_song_row`], which synthesizes the smallest valid record
//! it can:
//! - missing `song_slug` is generated from `song_name`
//! - missing `fields` is the union of field keys used by the slides
//! - slide ids absent from `slide_order` are appended to it
//! - field-map keys that are not enabled are dropped
//! - enabled fields missing from a slide are filled with `""`
//!
//! Identity columns (`song_id`, `song_name`, `user_id`) and timestamps are
//! never synthesized.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::models::{Slide, Song};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Expected a JSON object")]
    NotAnObject,

    #[error("Missing required field '{0}'")]
    MissingField(String),

    #[error("Field '{field}' has the wrong type, expected {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("Field '{field}' is not a valid timestamp: {value}")]
    InvalidTimestamp { field: String, value: String },

    #[error("Slide '{0}' is not listed in slide_order")]
    SlideNotInOrder(String),

    #[error("Field '{field}' in slide '{slide}' is not enabled")]
    FieldNotEnabled { slide: String, field: String },
}

/// Typed accessors over one JSON row.
///
/// `null` and absent are the same thing: fine for optional columns, a
/// [`ValidationError::MissingField`] for required ones.
#[derive(Debug, Clone, Copy)]
pub struct RowReader<'a> {
    row: &'a Map<String, Value>,
}

impl<'a> RowReader<'a> {
    pub fn new(value: &'a Value) -> Result<Self, ValidationError> {
        value
            .as_object()
            .map(|row| Self { row })
            .ok_or(ValidationError::NotAnObject)
    }

    fn present(&self, name: &str) -> Option<&'a Value> {
        self.row.get(name).filter(|v| !v.is_null())
    }

    pub fn has(&self, name: &str) -> bool {
        self.present(name).is_some()
    }

    pub fn required_str(&self, name: &str) -> Result<String, ValidationError> {
        self.optional_str(name)?
            .ok_or_else(|| ValidationError::MissingField(name.to_string()))
    }

    pub fn optional_str(&self, name: &str) -> Result<Option<String>, ValidationError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(name, "string")),
        }
    }

    pub fn timestamp(&self, name: &str) -> Result<DateTime<Utc>, ValidationError> {
        let raw = self.required_str(name)?;
        parse_timestamp(&raw).ok_or(ValidationError::InvalidTimestamp {
            field: name.to_string(),
            value: raw,
        })
    }

    pub fn string_list(&self, name: &str) -> Result<Vec<String>, ValidationError> {
        let items = self
            .present(name)
            .ok_or_else(|| ValidationError::MissingField(name.to_string()))?
            .as_array()
            .ok_or_else(|| wrong_type(name, "array of strings"))?;

        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| wrong_type(name, "array of strings"))
            })
            .collect()
    }

    pub fn object(&self, name: &str) -> Result<&'a Map<String, Value>, ValidationError> {
        self.present(name)
            .ok_or_else(|| ValidationError::MissingField(name.to_string()))?
            .as_object()
            .ok_or_else(|| wrong_type(name, "object"))
    }
}

fn wrong_type(field: &str, expected: &'static str) -> ValidationError {
    ValidationError::WrongType {
        field: field.to_string(),
        expected,
    }
}

/// RFC 3339, or a zone-less timestamp which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// URL-safe slug: lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Every slide id is in `slide_order`; every field-map key is enabled.
pub fn check_song_invariants(song: &Song) -> Result<(), ValidationError> {
    let order: BTreeSet<&str> = song.slide_order.iter().map(String::as_str).collect();
    let enabled: BTreeSet<&str> = song.fields.iter().map(String::as_str).collect();

    for (slide_id, slide) in &song.slides {
        if !order.contains(slide_id.as_str()) {
            return Err(ValidationError::SlideNotInOrder(slide_id.clone()));
        }
        if let Some(field) = slide
            .field_data
            .keys()
            .find(|key| !enabled.contains(key.as_str()))
        {
            return Err(ValidationError::FieldNotEnabled {
                slide: slide_id.clone(),
                field: field.clone(),
            });
        }
    }

    Ok(())
}

pub(crate) fn parse_slides(
    slides: &Map<String, Value>,
) -> Result<BTreeMap<String, Slide>, ValidationError> {
    slides
        .iter()
        .map(|(id, raw)| {
            let reader = RowReader::new(raw)?;
            let slide_name = reader.required_str("slide_name")?;
            let field_data = string_map(reader.object("field_data")?, "field_data")?;
            Ok((
                id.clone(),
                Slide {
                    slide_name,
                    field_data,
                },
            ))
        })
        .collect()
}

fn string_map(
    map: &Map<String, Value>,
    name: &str,
) -> Result<BTreeMap<String, String>, ValidationError> {
    map.iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k.clone(), s.clone())),
            _ => Err(wrong_type(name, "map of strings")),
        })
        .collect()
}

/// Lenient decoding of a `song_public` row.
pub fn normalize_song_row(value: &Value) -> Result<Song, ValidationError> {
    let reader = RowReader::new(value)?;

    let song_id = reader.required_str("song_id")?;
    let song_name = reader.required_str("song_name")?;
    let user_id = reader.required_str("user_id")?;
    let created_at = reader.timestamp("created_at")?;
    let updated_at = reader.timestamp("updated_at")?;

    let mut slides = BTreeMap::new();
    if reader.has("slides") {
        for (id, raw) in reader.object("slides")? {
            let slide = RowReader::new(raw)?;
            let field_data = if slide.has("field_data") {
                lenient_string_map(slide.object("field_data")?)
            } else {
                BTreeMap::new()
            };
            slides.insert(
                id.clone(),
                Slide {
                    slide_name: slide.optional_str("slide_name")?.unwrap_or_default(),
                    field_data,
                },
            );
        }
    }

    let fields: Vec<String> = if reader.has("fields") {
        reader.string_list("fields")?
    } else {
        slides
            .values()
            .flat_map(|slide| slide.field_data.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    };

    let mut slide_order = if reader.has("slide_order") {
        reader.string_list("slide_order")?
    } else {
        Vec::new()
    };
    for id in slides.keys() {
        if !slide_order.contains(id) {
            slide_order.push(id.clone());
        }
    }

    for slide in slides.values_mut() {
        slide.field_data.retain(|key, _| fields.contains(key));
        for field in &fields {
            slide.field_data.entry(field.clone()).or_default();
        }
    }

    let song_slug = match reader.optional_str("song_slug")? {
        Some(slug) if !slug.trim().is_empty() => slug,
        _ => {
            let generated = slugify(&song_name);
            if generated.is_empty() {
                song_id.clone()
            } else {
                generated
            }
        }
    };

    let song = Song {
        song_id,
        song_name,
        song_slug,
        slide_order,
        slides,
        fields,
        user_id,
        short_credit: reader.optional_str("short_credit").unwrap_or(None),
        long_credit: reader.optional_str("long_credit").unwrap_or(None),
        public_notes: reader.optional_str("public_notes").unwrap_or(None),
        created_at,
        updated_at,
    };

    check_song_invariants(&song)?;
    Ok(song)
}

/// Strings kept, scalars stringified, null becomes empty, nested values dropped.
fn lenient_string_map(map: &Map<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(_) | Value::Object(_) => return None,
            };
            Some((k.clone(), value))
        })
        .collect()
}

//! Denormalized display-field lookups
//!
//! Library entries carry the owner's username and the song's name/slug for
//! display. Both are looked up with one batched `in` query per table. A
//! lookup that finds nothing simply leaves the field `None`; a failed query
//! is an error.

use bridge_traits::{Filter, SelectQuery};
use core_auth::AuthorizedClient;
use core_runtime::config::TableConfig;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::{LibraryError, Result};
use crate::models::LibraryEntry;
use crate::validation::RowReader;

/// Display fields of one song
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongTitle {
    pub song_name: String,
    pub song_slug: String,
}

/// `user_id -> username` from the public profile table
pub async fn fetch_usernames(
    client: &AuthorizedClient,
    tables: &TableConfig,
    user_ids: &BTreeSet<String>,
) -> Result<HashMap<String, String>> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let query = SelectQuery::new(&tables.user_public, "user_id, username")
        .filter(Filter::in_list("user_id", user_ids.iter().cloned()));
    let rows = select_rows(client, query).await?;

    let usernames: HashMap<String, String> = rows
        .iter()
        .filter_map(|row| {
            let reader = RowReader::new(row).ok()?;
            let user_id = reader.required_str("user_id").ok()?;
            let username = reader.required_str("username").ok()?;
            Some((user_id, username))
        })
        .collect();

    debug!(requested = user_ids.len(), found = usernames.len(), "Usernames looked up");
    Ok(usernames)
}

/// `song_id -> (name, slug)` from the public song table
pub async fn fetch_song_titles(
    client: &AuthorizedClient,
    tables: &TableConfig,
    song_ids: &BTreeSet<String>,
) -> Result<HashMap<String, SongTitle>> {
    if song_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let query = SelectQuery::new(&tables.song_public, "song_id, song_name, song_slug")
        .filter(Filter::in_list("song_id", song_ids.iter().cloned()));
    let rows = select_rows(client, query).await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let reader = RowReader::new(row).ok()?;
            Some((
                reader.required_str("song_id").ok()?,
                SongTitle {
                    song_name: reader.required_str("song_name").ok()?,
                    song_slug: reader.optional_str("song_slug").ok()?.unwrap_or_default(),
                },
            ))
        })
        .collect())
}

/// Attach whatever display fields the lookups found
pub fn apply_display_fields(
    entry: &mut LibraryEntry,
    usernames: &HashMap<String, String>,
    titles: &HashMap<String, SongTitle>,
) {
    if let Some(username) = usernames.get(&entry.song_owner_id) {
        entry.owner_username = Some(username.clone());
    }
    if let Some(title) = titles.get(&entry.song_id) {
        entry.song_name = Some(title.song_name.clone());
        entry.song_slug = Some(title.song_slug.clone());
    }
}

/// Run a select and insist on a 2xx array body
pub(crate) async fn select_rows(client: &AuthorizedClient, query: SelectQuery) -> Result<Vec<Value>> {
    let table = query.table.clone();
    let response = client.select(query).await?;

    if !response.is_success() {
        return Err(LibraryError::from_response(&response));
    }

    match response.body {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Err(LibraryError::InvalidResponse(format!(
            "expected an array of rows from '{}', got {}",
            table,
            json_kind(&other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, AccessTokenProvider, BackendClient, BackendResponse,
    BridgeError, ChangeFeed, ChannelRequest, FeedChannel, Filter, HostSession, Mutation,
    SelectQuery,
};
use core_auth::SessionManager;
use core_runtime::config::TableConfig;
use core_runtime::events::EventBus;
use core_library::{EntityCache, FetchPipeline, LibraryCache, LibrarySlice};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// In-memory tables; records every call
#[derive(Default)]
pub struct FakeBackend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    queued_mutations: Mutex<VecDeque<BackendResponse>>,
    select_status: Mutex<Option<u16>>,
    offline: Mutex<bool>,
    pub selects: Mutex<Vec<SelectQuery>>,
    pub mutations: Mutex<Vec<Mutation>>,
}

impl FakeBackend {
    pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
        self.tables.lock().insert(table.to_string(), rows);
        self
    }

    pub fn queue_mutation_response(&self, response: BackendResponse) {
        self.queued_mutations.lock().push_back(response);
    }

    pub fn fail_selects_with(&self, status: u16) {
        *self.select_status.lock() = Some(status);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    pub fn network_calls(&self) -> usize {
        self.selects.lock().len() + self.mutations.lock().len()
    }

    pub fn selects_on(&self, table: &str) -> Vec<SelectQuery> {
        self.selects
            .lock()
            .iter()
            .filter(|q| q.table == table)
            .cloned()
            .collect()
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let cell = row.get(filter.column()).and_then(Value::as_str);
    match filter {
        Filter::Eq { value, .. } => cell == Some(value.as_str()),
        Filter::In { values, .. } => cell.map_or(false, |c| values.iter().any(|v| v == c)),
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn select(&self, _access_token: &str, query: SelectQuery) -> BridgeResult<BackendResponse> {
        self.selects.lock().push(query.clone());
        if *self.offline.lock() {
            return Err(BridgeError::Network("connection refused".to_string()));
        }
        if let Some(status) = *self.select_status.lock() {
            return Ok(BackendResponse::new(status, json!({ "message": "select failed" })));
        }

        let rows: Vec<Value> = self
            .tables
            .lock()
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(BackendResponse::ok(Value::Array(rows)))
    }

    async fn mutate(&self, _access_token: &str, mutation: Mutation) -> BridgeResult<BackendResponse> {
        self.mutations.lock().push(mutation.clone());
        if *self.offline.lock() {
            return Err(BridgeError::Network("connection refused".to_string()));
        }
        if let Some(response) = self.queued_mutations.lock().pop_front() {
            return Ok(response);
        }

        Ok(match mutation {
            Mutation::Insert { mut row, .. } => {
                row["created_at"] = json!("2024-05-01T12:00:00Z");
                BackendResponse::new(201, json!([row]))
            }
            Mutation::Delete { .. } => BackendResponse::ok(json!([])),
        })
    }
}

pub struct NoFeed;

#[async_trait]
impl ChangeFeed for NoFeed {
    async fn open_channel(&self, _access_token: &str, _request: ChannelRequest) -> BridgeResult<FeedChannel> {
        Err(BridgeError::NotAvailable("no change feed in this test".to_string()))
    }
}

pub struct FixedSession(pub Option<HostSession>);

#[async_trait]
impl AccessTokenProvider for FixedSession {
    async fn current_session(&self) -> BridgeResult<Option<HostSession>> {
        Ok(self.0.clone())
    }
}

pub fn signed_in() -> Arc<FixedSession> {
    Arc::new(FixedSession(Some(HostSession::new("me", "token-me"))))
}

pub fn sessions(backend: Arc<FakeBackend>, provider: Arc<FixedSession>, bus: EventBus) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(provider, backend, Arc::new(NoFeed), bus))
}

pub fn pipeline(backend: Arc<FakeBackend>, provider: Arc<FixedSession>, bus: EventBus) -> FetchPipeline {
    FetchPipeline::new(
        sessions(backend, provider, bus.clone()),
        TableConfig::default(),
        EntityCache::shared(),
        EntityCache::shared(),
        bus,
    )
}

pub fn slice(backend: Arc<FakeBackend>, provider: Arc<FixedSession>, bus: EventBus) -> LibrarySlice {
    LibrarySlice::new(
        sessions(backend, provider, bus.clone()),
        TableConfig::default(),
        LibraryCache::shared(),
        EntityCache::shared(),
        bus,
    )
}

pub fn song_row(id: &str, slug: &str) -> Value {
    json!({
        "song_id": id,
        "song_name": format!("Song {}", id),
        "song_slug": slug,
        "slide_order": ["v1"],
        "slides": { "v1": { "slide_name": "Verse", "field_data": { "en": "la la" } } },
        "fields": ["en"],
        "user_id": "owner",
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-02T00:00:00Z"
    })
}

pub fn private_row(id: &str, notes: &str) -> Value {
    json!({
        "song_id": id,
        "private_notes": notes,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })
}

pub fn library_row(song_id: &str, owner: &str, user: &str) -> Value {
    json!({
        "song_id": song_id,
        "song_owner_id": owner,
        "user_id": user,
        "created_at": "2024-01-01T00:00:00Z"
    })
}

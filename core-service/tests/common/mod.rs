#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, AccessTokenProvider, BackendClient, BackendResponse,
    BridgeError, ChangeFeed, ChannelHandle, ChannelRequest, ChannelStatus, FeedChannel,
    FeedMessage, Filter, HostSession, Mutation, SelectQuery,
};
use core_runtime::config::CoreConfig;
use core_service::SongbookService;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// -----------------------------------------------------------------------------
// Change feed
// -----------------------------------------------------------------------------

/// One channel opened through [`FakeFeed`]
pub struct FakeChannel {
    pub request: ChannelRequest,
    sender: Mutex<Option<mpsc::UnboundedSender<FeedMessage>>>,
    closed: AtomicBool,
}

impl FakeChannel {
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    pub fn send(&self, message: FeedMessage) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.unbounded_send(message);
        }
    }

    pub fn send_change(&self, payload: Value) {
        self.send(FeedMessage::Change(payload));
    }
}

struct FakeHandle(Arc<FakeChannel>);

impl ChannelHandle for FakeHandle {
    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.sender.lock().take();
    }
}

/// Records every channel; confirms each one with `Subscribed` unless told not to
#[derive(Default)]
pub struct FakeFeed {
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    refuse: AtomicBool,
    silent: AtomicBool,
}

impl FakeFeed {
    pub fn refuse_channels(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Stop sending the initial `Subscribed` status
    pub fn stay_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    pub fn opened(&self) -> Vec<Arc<FakeChannel>> {
        self.channels.lock().clone()
    }

    pub fn live(&self) -> Vec<Arc<FakeChannel>> {
        self.channels
            .lock()
            .iter()
            .filter(|c| c.is_open())
            .cloned()
            .collect()
    }

    pub fn live_on(&self, table: &str) -> Vec<Arc<FakeChannel>> {
        self.live()
            .into_iter()
            .filter(|c| c.request.table == table)
            .collect()
    }
}

#[async_trait]
impl ChangeFeed for FakeFeed {
    async fn open_channel(&self, _access_token: &str, request: ChannelRequest) -> BridgeResult<FeedChannel> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("channel refused".to_string()));
        }

        let (sender, receiver) = mpsc::unbounded();
        if !self.silent.load(Ordering::SeqCst) {
            let _ = sender.unbounded_send(FeedMessage::Status(ChannelStatus::Subscribed));
        }

        let channel = Arc::new(FakeChannel {
            request,
            sender: Mutex::new(Some(sender)),
            closed: AtomicBool::new(false),
        });
        self.channels.lock().push(Arc::clone(&channel));

        Ok(FeedChannel {
            messages: receiver.boxed(),
            handle: Box::new(FakeHandle(channel)),
        })
    }
}

// -----------------------------------------------------------------------------
// Backend
// -----------------------------------------------------------------------------

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

// -----------------------------------------------------------------------------
// Session
// -----------------------------------------------------------------------------

pub struct FixedSession(pub Option<HostSession>);

#[async_trait]
impl AccessTokenProvider for FixedSession {
    async fn current_session(&self) -> BridgeResult<Option<HostSession>> {
        Ok(self.0.clone())
    }
}

// -----------------------------------------------------------------------------
// Fixtures
// -----------------------------------------------------------------------------

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub feed: Arc<FakeFeed>,
    pub service: SongbookService,
}

impl Harness {
    pub fn new(backend: FakeBackend) -> Self {
        Self::with_session(backend, Some(HostSession::new("me", "token-me")))
    }

    pub fn with_session(backend: FakeBackend, session: Option<HostSession>) -> Self {
        let backend = Arc::new(backend);
        let feed = Arc::new(FakeFeed::default());
        let config = CoreConfig::builder()
            .backend(backend.clone())
            .change_feed(feed.clone())
            .token_provider(Arc::new(FixedSession(session)))
            .build()
            .unwrap();

        Self {
            backend,
            feed,
            service: SongbookService::new(config).unwrap(),
        }
    }
}

/// Poll `condition` until it holds, yielding to spawned tasks in between
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

pub fn song_row(id: &str, slug: &str) -> Value {
    json!({
        "song_id": id,
        "song_name": format!("Song {}", id),
        "song_slug": slug,
        "slide_order": ["v1"],
        "slides": { "v1": { "slide_name": "Verse", "field_data": { "en": "la" } } },
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

pub fn in_filter(ids: &[&str]) -> String {
    Filter::in_list("song_id", ids.iter().copied()).render()
}

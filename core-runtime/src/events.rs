//! # Event Bus System
//!
//! State-change notifications for the presentation layer, published through
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The core owns every cache, registry and subscription slot; the host never
//! mutates them. Instead it listens here and re-reads the selectors it cares
//! about whenever something relevant changes.
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Fetch / Slice├──────────────>│           │     subscribe    ┌────────────┐
//! └──────────────┘               │ EventBus  ├─────────────────>│    Host    │
//! ┌──────────────┐     emit      │ (broadcast│                  └────────────┘
//! │ Subscriptions├──────────────>│  channel) │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Cache(CacheEvent::SongsMerged {
//!     song_ids: vec!["s1".to_string()],
//! }))
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Cache(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Re-read the
//!   selectors and keep going.
//! - **`RecvError::Closed`**: the core was dropped.
//!
//! Emitting with no subscribers returns `Err`; callers in the core ignore it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
    Cache(CacheEvent),
    Subscription(SubscriptionEvent),
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Subscription(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(_) => EventSeverity::Warning,
            CoreEvent::Subscription(SubscriptionEvent::ChannelError { .. })
            | CoreEvent::Subscription(SubscriptionEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Library(LibraryEvent::ErrorChanged {
                message: Some(_), ..
            }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::RecordsSkipped { .. }) => EventSeverity::Warning,
            CoreEvent::Subscription(SubscriptionEvent::Subscribed { .. })
            | CoreEvent::Library(LibraryEvent::Replaced { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Problems acquiring the auth-scoped client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// No signed-in session, or the provider failed.
    SessionUnavailable { reason: String },
    /// The token provider did not answer in time.
    TokenTimedOut { timeout_ms: u64 },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SessionUnavailable { .. } => "No authenticated client available",
            AuthEvent::TokenTimedOut { .. } => "Access token request timed out",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Entity cache changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    SongsMerged { song_ids: Vec<String> },
    SongsEvicted { song_ids: Vec<String> },
    PrivateSongsMerged { song_ids: Vec<String> },
    PrivateSongsEvicted { song_ids: Vec<String> },
    /// Rows dropped by validation during a bulk fetch.
    RecordsSkipped { entity: String, count: usize },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::SongsMerged { .. } => "Songs merged into cache",
            CacheEvent::SongsEvicted { .. } => "Songs evicted from cache",
            CacheEvent::PrivateSongsMerged { .. } => "Private songs merged into cache",
            CacheEvent::PrivateSongsEvicted { .. } => "Private songs evicted from cache",
            CacheEvent::RecordsSkipped { .. } => "Malformed records skipped",
        }
    }
}

// ============================================================================
// Subscription Events
// ============================================================================

/// Change-feed subscription lifecycle, per registry kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SubscriptionEvent {
    Subscribing { registry: String, ids: Vec<String> },
    Subscribed { registry: String, filter: String },
    /// Channel reported an error or time-out; the handle is kept for teardown.
    ChannelError {
        registry: String,
        message: String,
        timed_out: bool,
    },
    /// Could not open a channel at all; no handle exists.
    Failed { registry: String, message: String },
    TornDown { registry: String },
}

impl SubscriptionEvent {
    fn description(&self) -> &str {
        match self {
            SubscriptionEvent::Subscribing { .. } => "Opening change-feed channel",
            SubscriptionEvent::Subscribed { .. } => "Change-feed channel live",
            SubscriptionEvent::ChannelError { .. } => "Change-feed channel error",
            SubscriptionEvent::Failed { .. } => "Change-feed subscription failed",
            SubscriptionEvent::TornDown { .. } => "Change-feed channel closed",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

/// Ownership library slice changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    LoadingChanged { loading: bool },
    EntryAdded { song_id: String },
    EntryRemoved { song_id: String },
    Replaced { count: usize },
    /// `None` when a previous error was cleared.
    ErrorChanged { message: Option<String> },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::LoadingChanged { .. } => "Library loading state changed",
            LibraryEvent::EntryAdded { .. } => "Song added to library",
            LibraryEvent::EntryRemoved { .. } => "Song removed from library",
            LibraryEvent::Replaced { .. } => "Library reloaded",
            LibraryEvent::ErrorChanged { .. } => "Library error changed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every clone publishes to the same
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let library_only =
///     EventStream::new(bus.subscribe()).filter(|e| matches!(e, CoreEvent::Library(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. Returns `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

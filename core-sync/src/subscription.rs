//! # Subscription Manager
//!
//! Keeps at most one live change-feed channel per registry kind, filtered on
//! exactly the registry's current id set.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Subscribing → Subscribed
//!   ↑         │            │
//!   │         ↓            ↓
//!   └────── (fail)       Error
//!   └──────── teardown ────┘
//! ```
//!
//! - `Subscribing`: authorization and channel creation are in flight.
//! - `Subscribed`: the provider confirmed the channel.
//! - `Error`: the provider reported a channel error or time-out. The handle
//!   is kept so the next teardown still closes it.
//!
//! ## Resubscribe
//!
//! A channel's filter is fixed when it is opened, so every id-set change
//! closes the current channel and opens a new one. Teardown is synchronous
//! and finishes before [`SubscriptionManager::resubscribe`] returns; opening
//! the replacement runs on a spawned task.
//!
//! Each resubscribe bumps a generation counter. A task that finishes opening
//! a channel after a newer resubscribe started closes the channel it just
//! opened instead of installing it. Closing a channel also signals its
//! dispatch loop, which stops even when the provider's stream stays pending.
//!
//! Failures (no session, token timeout, provider refused) leave the slot
//! `Idle` with no handle. Nothing is retried until the id set changes again.

use async_trait::async_trait;
use bridge_traits::{ChannelHandle, ChannelRequest, ChannelStatus, FeedChannel, FeedMessage, Filter};
use core_auth::SessionManager;
use core_library::RegistryKind;
use core_runtime::config::TableConfig;
use core_runtime::events::{CoreEvent, EventBus, SubscriptionEvent};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Lifecycle phase of one registry kind's channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPhase {
    #[default]
    Idle,
    Subscribing,
    Subscribed,
    Error,
}

impl SubscriptionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPhase::Idle => "idle",
            SubscriptionPhase::Subscribing => "subscribing",
            SubscriptionPhase::Subscribed => "subscribed",
            SubscriptionPhase::Error => "error",
        }
    }
}

impl std::fmt::Display for SubscriptionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by [`SubscriptionManager::status`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub phase: SubscriptionPhase,
    /// Ids the current subscription is meant to cover
    pub ids: BTreeSet<String>,
    /// Filter of the installed channel, `None` when no handle exists
    pub filter: Option<String>,
    pub last_error: Option<String>,
}

impl SubscriptionStatus {
    pub fn has_live_channel(&self) -> bool {
        self.filter.is_some()
    }
}

/// Receives raw change payloads from a live channel
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle_change(&self, payload: Value) -> Result<()>;
}

struct LiveChannel {
    filter: String,
    handle: Box<dyn ChannelHandle>,
    /// Ends the dispatch loop; dropping it does too
    stop: oneshot::Sender<()>,
}

#[derive(Default)]
struct SlotState {
    phase: SubscriptionPhase,
    generation: u64,
    ids: BTreeSet<String>,
    live: Option<LiveChannel>,
    last_error: Option<String>,
}

struct Inner {
    kind: RegistryKind,
    table: String,
    sessions: Arc<SessionManager>,
    state: Mutex<SlotState>,
    event_bus: EventBus,
}

/// Channel slot for one registry kind
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    pub fn new(
        kind: RegistryKind,
        tables: &TableConfig,
        sessions: Arc<SessionManager>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                table: kind.table(tables).to_string(),
                sessions,
                state: Mutex::new(SlotState::default()),
                event_bus,
            }),
        }
    }

    pub fn kind(&self) -> RegistryKind {
        self.inner.kind
    }

    pub fn status(&self) -> SubscriptionStatus {
        let state = self.inner.state.lock();
        SubscriptionStatus {
            phase: state.phase,
            ids: state.ids.clone(),
            filter: state.live.as_ref().map(|live| live.filter.clone()),
            last_error: state.last_error.clone(),
        }
    }

    /// Replace the channel so that it covers exactly `ids`.
    ///
    /// The current channel is closed before this returns. When `ids` is
    /// non-empty a task is spawned to open the replacement and its handle is
    /// returned; an empty set leaves the slot `Idle`.
    ///
    /// # Panics
    ///
    /// Panics when `ids` is non-empty and no Tokio runtime is running.
    pub fn resubscribe(
        &self,
        ids: BTreeSet<String>,
        handler: Arc<dyn ChangeHandler>,
    ) -> Option<JoinHandle<()>> {
        let generation = {
            let mut state = self.inner.state.lock();
            self.inner.close_live(&mut state);
            state.generation += 1;
            state.ids = ids.clone();
            state.last_error = None;
            state.phase = if ids.is_empty() {
                SubscriptionPhase::Idle
            } else {
                SubscriptionPhase::Subscribing
            };
            state.generation
        };

        if ids.is_empty() {
            debug!(registry = %self.inner.kind, "No active ids; staying idle");
            return None;
        }

        self.inner.emit(SubscriptionEvent::Subscribing {
            registry: self.inner.kind.to_string(),
            ids: ids.iter().cloned().collect(),
        });

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(inner.open(generation, ids, handler)))
    }

    /// Close any channel and return to `Idle`
    pub fn teardown(&self) {
        let mut state = self.inner.state.lock();
        self.inner.close_live(&mut state);
        state.generation += 1;
        state.ids.clear();
        state.phase = SubscriptionPhase::Idle;
        state.last_error = None;
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Inner {
    fn close_live(&self, state: &mut SlotState) {
        if let Some(live) = state.live.take() {
            live.handle.close();
            let _ = live.stop.send(());
            info!(registry = %self.kind, filter = %live.filter, "Channel torn down");
            self.emit(SubscriptionEvent::TornDown {
                registry: self.kind.to_string(),
            });
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    #[instrument(skip(self, ids, handler), fields(registry = %self.kind, count = ids.len()))]
    async fn open(self: Arc<Self>, generation: u64, ids: BTreeSet<String>, handler: Arc<dyn ChangeHandler>) {
        let filter = Filter::in_list(self.kind.filter_column(), ids).render();

        let channel = match self.open_channel(&filter).await {
            Ok(channel) => channel,
            Err(e) => {
                self.fail(generation, e);
                return;
            }
        };

        let FeedChannel { messages, handle } = channel;
        let (stop, stopped) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                drop(state);
                handle.close();
                debug!("Superseded while opening; closed the new channel");
                return;
            }
            state.live = Some(LiveChannel {
                filter: filter.clone(),
                handle,
                stop,
            });
        }

        debug!(%filter, "Channel installed");
        tokio::spawn(self.dispatch(generation, messages, stopped, handler));
    }

    async fn open_channel(&self, filter: &str) -> Result<FeedChannel> {
        let client = self.sessions.authorize().await?;
        let request = ChannelRequest {
            name: format!("{}-{}", self.kind, Uuid::new_v4()),
            table: self.table.clone(),
            filter: filter.to_string(),
        };
        Ok(client.open_channel(request).await?)
    }

    fn fail(&self, generation: u64, error: SyncError) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!(error = %error, "Superseded subscribe attempt failed");
                return;
            }
            state.phase = SubscriptionPhase::Idle;
            state.last_error = Some(error.to_string());
        }

        warn!(registry = %self.kind, error = %error, "Subscription failed");
        self.emit(SubscriptionEvent::Failed {
            registry: self.kind.to_string(),
            message: error.to_string(),
        });
    }

    async fn dispatch(
        self: Arc<Self>,
        generation: u64,
        mut messages: BoxStream<'static, FeedMessage>,
        mut stopped: oneshot::Receiver<()>,
        handler: Arc<dyn ChangeHandler>,
    ) {
        loop {
            let message = tokio::select! {
                _ = &mut stopped => break,
                message = messages.next() => message,
            };
            let Some(message) = message else {
                break;
            };
            if !self.is_current(generation) {
                break;
            }

            match message {
                FeedMessage::Status(status) => {
                    if !self.apply_status(generation, status) {
                        break;
                    }
                }
                FeedMessage::Change(payload) => {
                    if let Err(e) = handler.handle_change(payload).await {
                        warn!(registry = %self.kind, error = %e, "Change event failed");
                    }
                }
            }
        }
        debug!(registry = %self.kind, generation, "Dispatch loop ended");
    }

    /// Returns false once the channel can deliver nothing more
    fn apply_status(&self, generation: u64, status: ChannelStatus) -> bool {
        let registry = self.kind.to_string();

        let (event, keep_going) = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }

            match status {
                ChannelStatus::Subscribed => {
                    state.phase = SubscriptionPhase::Subscribed;
                    state.last_error = None;
                    let filter = state
                        .live
                        .as_ref()
                        .map(|live| live.filter.clone())
                        .unwrap_or_default();
                    (SubscriptionEvent::Subscribed { registry, filter }, true)
                }
                ChannelStatus::ChannelError(message) => {
                    state.phase = SubscriptionPhase::Error;
                    let error = SyncError::ChannelError {
                        registry: registry.clone(),
                        message,
                    };
                    state.last_error = Some(error.to_string());
                    (
                        SubscriptionEvent::ChannelError {
                            registry,
                            message: error.to_string(),
                            timed_out: false,
                        },
                        true,
                    )
                }
                ChannelStatus::TimedOut => {
                    state.phase = SubscriptionPhase::Error;
                    let error = SyncError::TimedOut {
                        registry: registry.clone(),
                    };
                    state.last_error = Some(error.to_string());
                    (
                        SubscriptionEvent::ChannelError {
                            registry,
                            message: error.to_string(),
                            timed_out: true,
                        },
                        true,
                    )
                }
                ChannelStatus::Closed => {
                    state.phase = SubscriptionPhase::Error;
                    let error = SyncError::ChannelClosed {
                        registry: registry.clone(),
                    };
                    state.last_error = Some(error.to_string());
                    (
                        SubscriptionEvent::ChannelError {
                            registry,
                            message: error.to_string(),
                            timed_out: false,
                        },
                        false,
                    )
                }
            }
        };

        match &event {
            SubscriptionEvent::Subscribed { filter, .. } => {
                info!(registry = %self.kind, %filter, "Channel subscribed")
            }
            SubscriptionEvent::ChannelError { message, .. } => {
                warn!(registry = %self.kind, %message, "Channel reported a problem")
            }
            _ => {}
        }
        self.emit(event);
        keep_going
    }

    fn emit(&self, event: SubscriptionEvent) {
        let _ = self.event_bus.emit(CoreEvent::Subscription(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_idle_without_channel() {
        let status = SubscriptionStatus::default();
        assert_eq!(status.phase, SubscriptionPhase::Idle);
        assert!(!status.has_live_channel());
    }

    #[test]
    fn test_phase_serializes_lowercase() {
        let json = serde_json::to_string(&SubscriptionPhase::Subscribed).unwrap();
        assert_eq!(json, "\"subscribed\"");
        assert_eq!(SubscriptionPhase::Error.to_string(), "error");
    }
}

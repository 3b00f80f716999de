//! # Active Set
//!
//! One registry kind end to end: the id registry, the fetch it triggers and
//! the change-feed channel that keeps the cached rows fresh.
//!
//! Registry updates are synchronous. [`ActiveSet::add_ids`] returns with the
//! new id set already visible and the old channel already closed; the fetch
//! and the replacement channel run on spawned tasks collected in a
//! [`PendingSync`]. Dropping the `PendingSync` leaves them running in the
//! background; awaiting [`PendingSync::settle`] waits for them.

use async_trait::async_trait;
use core_auth::SessionManager;
use core_library::{ActiveIdRegistry, FetchPipeline, RegistryKind};
use core_runtime::config::TableConfig;
use core_runtime::events::EventBus;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::realtime::{RealtimeReducer, ReducerOutcome};
use crate::subscription::{ChangeHandler, SubscriptionManager, SubscriptionStatus};

/// Background work scheduled by a registry update
#[derive(Debug, Default)]
pub struct PendingSync {
    tasks: Vec<JoinHandle<()>>,
}

impl PendingSync {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Fold another update's work into this one
    pub fn merge(mut self, other: PendingSync) -> Self {
        self.tasks.extend(other.tasks);
        self
    }

    /// Wait for every scheduled fetch and subscribe attempt to finish.
    ///
    /// Failures were already logged by the tasks themselves.
    pub async fn settle(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "Background sync task panicked");
                }
            }
        }
    }
}

/// Registry + fetch + subscription for one [`RegistryKind`]
pub struct ActiveSet {
    kind: RegistryKind,
    registry: RwLock<ActiveIdRegistry>,
    subscription: SubscriptionManager,
    pipeline: Option<Arc<FetchPipeline>>,
    handler: Arc<dyn ChangeHandler>,
}

impl ActiveSet {
    /// `pipeline` is used for the kinds that fetch on add (public and private
    /// songs); the library kind is filled by its slice instead.
    pub fn new(
        kind: RegistryKind,
        tables: &TableConfig,
        sessions: Arc<SessionManager>,
        pipeline: Option<Arc<FetchPipeline>>,
        reducer: Arc<dyn RealtimeReducer>,
        event_bus: EventBus,
    ) -> Arc<Self> {
        Arc::new_cyclic(|set: &Weak<ActiveSet>| Self {
            kind,
            registry: RwLock::new(ActiveIdRegistry::new()),
            subscription: SubscriptionManager::new(kind, tables, sessions, event_bus),
            pipeline,
            handler: Arc::new(ActiveSetHandler {
                reducer,
                set: set.clone(),
            }),
        })
    }

    pub fn kind(&self) -> RegistryKind {
        self.kind
    }

    pub fn ids(&self) -> BTreeSet<String> {
        self.registry.read().ids().clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.read().contains(id)
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.subscription.status()
    }

    /// Add ids, fetch their rows and resubscribe if the set grew.
    ///
    /// Id-keyed fetches always request every id passed in, cached or not.
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime when there is work to schedule.
    pub fn add_ids<I, S>(&self, ids: I) -> PendingSync
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requested: Vec<String> = ids.into_iter().map(Into::into).collect();
        let resubscribe = self.update(|registry| registry.add(requested.iter().cloned()));

        let mut pending = self.fetch(requested);
        pending.tasks.extend(resubscribe);
        pending
    }

    /// Remove ids and resubscribe if the set shrank. Cached rows stay.
    pub fn remove_ids<I, S>(&self, ids: I) -> PendingSync
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        PendingSync {
            tasks: self.update(|registry| registry.remove(ids)).into_iter().collect(),
        }
    }

    /// Replace the whole set. Nothing is fetched.
    pub fn replace_ids(&self, ids: BTreeSet<String>) -> PendingSync {
        PendingSync {
            tasks: self.update(|_| ids).into_iter().collect(),
        }
    }

    /// Close the channel and forget every id
    pub fn shutdown(&self) {
        self.registry.write().set(BTreeSet::new());
        self.subscription.teardown();
    }

    /// Compute and install the next id set, resubscribing when it changed.
    ///
    /// The registry guard is held through the resubscribe so concurrent
    /// updates reach the subscription manager in the order they were applied.
    fn update<F>(&self, next: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(&ActiveIdRegistry) -> BTreeSet<String>,
    {
        let mut registry = self.registry.write();
        let next = next(&*registry);
        if !registry.set(next.clone()) {
            debug!(registry = %self.kind, "Active ids unchanged");
            return None;
        }

        debug!(registry = %self.kind, count = next.len(), "Active ids changed");
        self.subscription.resubscribe(next, Arc::clone(&self.handler))
    }

    fn fetch(&self, ids: Vec<String>) -> PendingSync {
        let Some(pipeline) = self.pipeline.clone() else {
            return PendingSync::default();
        };
        if ids.is_empty() {
            return PendingSync::default();
        }

        let kind = self.kind;
        let task = tokio::spawn(async move {
            let result = match kind {
                RegistryKind::PrivateSongs => pipeline.fetch_private_songs(&ids).await,
                _ => pipeline.fetch_songs_by_ids(&ids).await,
            };
            if let Err(e) = result {
                warn!(registry = %kind, error = %e, "Background fetch failed");
            }
        });

        PendingSync { tasks: vec![task] }
    }
}

/// Feeds channel payloads to the reducer and prunes deleted ids
struct ActiveSetHandler {
    reducer: Arc<dyn RealtimeReducer>,
    set: Weak<ActiveSet>,
}

#[async_trait]
impl ChangeHandler for ActiveSetHandler {
    async fn handle_change(&self, payload: Value) -> Result<()> {
        let outcome = self.reducer.reduce(&payload).await?;

        if let ReducerOutcome::Evicted(ids) = outcome {
            if let Some(set) = self.set.upgrade() {
                // The resubscribe replaces the channel this payload came from
                let _pending = set.remove_ids(ids);
            }
        }
        Ok(())
    }
}

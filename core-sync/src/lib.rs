//! # Realtime Sync Module
//!
//! Keeps the entity caches live while the UI needs them.
//!
//! ## Overview
//!
//! For every registry kind (public songs, private notes, library) this
//! module:
//! - Fetches rows for ids entering the active set
//! - Holds exactly one change-feed channel filtered on the active set,
//!   replacing it whenever the set changes
//! - Reduces change payloads into cache mutations
//!
//! ## Components
//!
//! - **Subscription Manager** (`subscription`): per-kind channel slot with a
//!   generation counter that discards superseded subscribe attempts
//! - **Realtime Reducers** (`realtime`): payload parsing, entity and library
//!   reducers
//! - **Active Set** (`active`): registry + fetch + subscription for one kind

pub mod active;
pub mod error;
pub mod realtime;
pub mod subscription;

pub use active::{ActiveSet, PendingSync};
pub use error::{Result, SyncError};
pub use realtime::{
    ChangeKind, ChangePayload, EntityReducer, LibraryReducer, RealtimeReducer, ReducerOutcome,
};
pub use subscription::{ChangeHandler, SubscriptionManager, SubscriptionPhase, SubscriptionStatus};

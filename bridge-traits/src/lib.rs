//! # Host Bridge Traits
//!
//! Capability traits the host application must provide to the songbook core.
//!
//! ## Overview
//!
//! The core never talks to the network directly. Everything remote goes
//! through one of these seams, which keeps the cache/subscription engine
//! testable with in-memory fakes and lets each host choose its own transport.
//!
//! ## Traits
//!
//! - [`BackendClient`](backend::BackendClient) - point queries and row mutations
//!   against the remote relational store
//! - [`ChangeFeed`](feed::ChangeFeed) - push-based row change channels with a
//!   static filter per channel
//! - [`AccessTokenProvider`](session::AccessTokenProvider) - the signed-in user
//!   and their bearer token
//! - [`LoggerSink`](logging::LoggerSink) - mirror structured logs to the host
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Backend + static session |
//! | Web      | host-injected       | 📋 Planned |
//!
//! ## Fail-Fast Strategy
//!
//! `core_runtime::config::CoreConfig` refuses to build when a required
//! capability is missing, returning `Error::CapabilityMissing` with a message
//! that says which bridge to inject.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Transport-level
//! failures are errors; server-side refusals are data (see
//! [`BackendResponse`](backend::BackendResponse)).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across
//! spawned tasks behind an `Arc`.

pub mod backend;
pub mod error;
pub mod feed;
pub mod logging;
pub mod session;

pub use error::BridgeError;

// Re-export commonly used types
pub use backend::{BackendClient, BackendResponse, Filter, Mutation, SelectQuery};
pub use feed::{ChangeFeed, ChannelHandle, ChannelRequest, ChannelStatus, FeedChannel, FeedMessage};
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use session::{AccessTokenProvider, HostSession};

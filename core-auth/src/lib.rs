//! # Authentication Module
//!
//! Auth-scoped client acquisition for the songbook core.
//!
//! ## Overview
//!
//! Sign-in itself belongs to the host. This crate only asks the host for the
//! current session when the core is about to touch the backend or the change
//! feed, and fails fast with [`AuthError::NoClientAvailable`] when there is
//! none.
//!
//! ## Features
//!
//! - Bounded access-token acquisition (`tokio::time::timeout`)
//! - Token never printed by `Debug`/`Display`
//! - Auth events on the core event bus

pub mod error;
pub mod session;
pub mod types;

pub use error::{AuthError, Result};
pub use session::{AuthorizedClient, SessionManager, DEFAULT_TOKEN_TIMEOUT};
pub use types::AccessToken;

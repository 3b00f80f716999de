//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `BackendClient` using `reqwest` against a PostgREST endpoint
//! - `AccessTokenProvider` holding a fixed, swappable session
//!
//! The change feed has no desktop default; the host injects its realtime
//! client.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{RestBackendClient, StaticTokenProvider};
//! use bridge_traits::HostSession;
//!
//! let backend = RestBackendClient::new("https://db.example.com", "anon-key")?;
//! let session = StaticTokenProvider::new(HostSession::new("user-1", token));
//! ```

mod backend;
mod session;

pub use backend::RestBackendClient;
pub use session::StaticTokenProvider;

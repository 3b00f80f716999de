//! # Core Configuration Module
//!
//! Builder-based configuration for the songbook core.
//!
//! ## Overview
//!
//! [`CoreConfig`] holds the host capabilities and the handful of tunables
//! the core needs. The builder is fail-fast: a missing capability is reported
//! with an actionable [`Error::CapabilityMissing`] before anything starts.
//!
//! ## Required Dependencies
//!
//! - `BackendClient` - queries and mutations (desktop default: reqwest REST
//!   client, when a `rest_endpoint` is given)
//! - `ChangeFeed` - realtime channels
//! - `AccessTokenProvider` - signed-in user and bearer token
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .backend(Arc::new(MyBackend))
//!     .change_feed(Arc::new(MyFeed))
//!     .token_provider(Arc::new(MySession))
//!     .auth_timeout(Duration::from_secs(5))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{AccessTokenProvider, BackendClient, ChangeFeed};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on access-token acquisition.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound accepted for [`CoreConfig::auth_timeout`].
pub const MAX_AUTH_TIMEOUT: Duration = Duration::from_secs(120);

/// Remote table names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Public song documents (realtime-synced)
    pub song_public: String,
    /// Private notes, one row per song
    pub song: String,
    /// Ownership relation
    pub song_library: String,
    /// Public user profiles, joined for owner display names
    pub user_public: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            song_public: "song_public".to_string(),
            song: "song".to_string(),
            song_library: "song_library".to_string(),
            user_public: "user_public".to_string(),
        }
    }
}

impl TableConfig {
    fn validate(&self) -> Result<()> {
        let names = [
            ("song_public", &self.song_public),
            ("song", &self.song),
            ("song_library", &self.song_library),
            ("user_public", &self.user_public),
        ];
        for (role, name) in names {
            if name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Table name for '{}' cannot be empty",
                    role
                )));
            }
        }
        Ok(())
    }
}

/// Core configuration for the songbook core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub backend: Arc<dyn BackendClient>,
    pub change_feed: Arc<dyn ChangeFeed>,
    pub token_provider: Arc<dyn AccessTokenProvider>,
    pub tables: TableConfig,
    /// Bound on each access-token request
    pub auth_timeout: Duration,
    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("backend", &"BackendClient { ... }")
            .field("change_feed", &"ChangeFeed { ... }")
            .field("token_provider", &"AccessTokenProvider { ... }")
            .field("tables", &self.tables)
            .field("auth_timeout", &self.auth_timeout)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates bounds and table names.
    pub fn validate(&self) -> Result<()> {
        if self.auth_timeout.is_zero() {
            return Err(Error::Config(
                "Auth timeout must be greater than 0".to_string(),
            ));
        }

        if self.auth_timeout > MAX_AUTH_TIMEOUT {
            return Err(Error::Config(format!(
                "Auth timeout exceeds maximum of {} seconds",
                MAX_AUTH_TIMEOUT.as_secs()
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.tables.validate()
    }
}

fn change_feed_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "ChangeFeed".to_string(),
        message: "ChangeFeed implementation is required for realtime subscriptions. \
                 Inject the host's realtime client with .change_feed()."
            .to_string(),
    }
}

fn token_provider_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "AccessTokenProvider".to_string(),
        message: "AccessTokenProvider implementation is required to scope backend calls \
                 to the signed-in user. Inject the host session with .token_provider()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_backend(endpoint: Option<RestEndpoint>) -> Result<Arc<dyn BackendClient>> {
    use bridge_desktop::RestBackendClient;

    let endpoint = endpoint.ok_or_else(|| Error::CapabilityMissing {
        capability: "BackendClient".to_string(),
        message: "BackendClient implementation is required for queries and mutations. \
                 Desktop: call .rest_endpoint(url, api_key) to use the default RestBackendClient, \
                 or inject one with .backend()."
            .to_string(),
    })?;

    let client = RestBackendClient::new(endpoint.url, endpoint.api_key).map_err(|e| {
        Error::Internal(format!("Failed to initialize default BackendClient: {}", e))
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_backend(_endpoint: Option<RestEndpoint>) -> Result<Arc<dyn BackendClient>> {
    Err(Error::CapabilityMissing {
        capability: "BackendClient".to_string(),
        message: "BackendClient implementation is required for queries and mutations. \
                 Desktop: enable the 'desktop-shims' feature and set .rest_endpoint(). \
                 Other hosts: inject one with .backend()."
            .to_string(),
    })
}

#[derive(Clone)]
struct RestEndpoint {
    url: String,
    api_key: String,
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    backend: Option<Arc<dyn BackendClient>>,
    change_feed: Option<Arc<dyn ChangeFeed>>,
    token_provider: Option<Arc<dyn AccessTokenProvider>>,
    rest_endpoint: Option<RestEndpoint>,
    tables: Option<TableConfig>,
    auth_timeout: Option<Duration>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the backend client. Takes precedence over [`rest_endpoint`](Self::rest_endpoint).
    pub fn backend(mut self, backend: Arc<dyn BackendClient>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn change_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.change_feed = Some(feed);
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn AccessTokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// REST endpoint for the default desktop backend.
    ///
    /// Only used with the `desktop-shims` feature and when no backend was
    /// injected.
    pub fn rest_endpoint(mut self, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.rest_endpoint = Some(RestEndpoint {
            url: url.into(),
            api_key: api_key.into(),
        });
        self
    }

    pub fn tables(mut self, tables: TableConfig) -> Self {
        self.tables = Some(tables);
        self
    }

    /// Default: 10 seconds
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = Some(timeout);
        self
    }

    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the final `CoreConfig`.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a required bridge is absent
    /// - [`Error::Config`] when a tunable is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let change_feed = self.change_feed.ok_or_else(change_feed_missing_error)?;
        let token_provider = self.token_provider.ok_or_else(token_provider_missing_error)?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => provide_default_backend(self.rest_endpoint)?,
        };

        let config = CoreConfig {
            backend,
            change_feed,
            token_provider,
            tables: self.tables.unwrap_or_default(),
            auth_timeout: self.auth_timeout.unwrap_or(DEFAULT_AUTH_TIMEOUT),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

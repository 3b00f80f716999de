//! # Session Manager
//!
//! Turns the host session into an auth-scoped client.
//!
//! ## Overview
//!
//! Every backend query, mutation and change-feed channel is scoped by the
//! bearer token of the signed-in user. [`SessionManager::authorize`] asks the
//! host [`AccessTokenProvider`] for that token, bounded by a timeout, and hands
//! back an [`AuthorizedClient`] that carries it.
//!
//! There is no retry anywhere in this module. A missing session, a provider
//! failure or a timeout is reported once, as an [`AuthError`] plus an
//! [`AuthEvent`] on the bus, and the caller decides what to do.
//!
//! ## Usage
//!
//! ```ignore
//! use core_auth::SessionManager;
//!
//! let sessions = SessionManager::new(token_provider, backend, change_feed, event_bus);
//! let client = sessions.authorize().await?;
//! let response = client.select(query).await?;
//! ```

use crate::error::{AuthError, Result};
use crate::types::AccessToken;
use bridge_traits::{
    error::Result as BridgeResult, AccessTokenProvider, BackendClient, BackendResponse,
    ChangeFeed, ChannelRequest, FeedChannel, Filter, Mutation, SelectQuery,
};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument, warn};

/// Default bound on access-token acquisition
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of auth-scoped clients.
pub struct SessionManager {
    token_provider: Arc<dyn AccessTokenProvider>,
    backend: Arc<dyn BackendClient>,
    change_feed: Arc<dyn ChangeFeed>,
    token_timeout: Duration,
    event_bus: EventBus,
}

impl SessionManager {
    pub fn new(
        token_provider: Arc<dyn AccessTokenProvider>,
        backend: Arc<dyn BackendClient>,
        change_feed: Arc<dyn ChangeFeed>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            token_provider,
            backend,
            change_feed,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            event_bus,
        }
    }

    pub fn with_token_timeout(mut self, token_timeout: Duration) -> Self {
        self.token_timeout = token_timeout;
        self
    }

    pub fn token_timeout(&self) -> Duration {
        self.token_timeout
    }

    /// Acquire a client scoped to the current session.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoClientAvailable`] when nobody is signed in
    /// - [`AuthError::TokenTimeout`] when the provider does not answer in time
    /// - [`AuthError::Provider`] when the provider itself fails
    #[instrument(skip(self), fields(timeout_ms = self.token_timeout.as_millis() as u64))]
    pub async fn authorize(&self) -> Result<AuthorizedClient> {
        let session = match timeout(self.token_timeout, self.token_provider.current_session()).await
        {
            Ok(Ok(Some(session))) => session,
            Ok(Ok(None)) => {
                warn!("No signed-in session");
                self.emit(AuthEvent::SessionUnavailable {
                    reason: "not signed in".to_string(),
                });
                return Err(AuthError::NoClientAvailable("not signed in".to_string()));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Session provider failed");
                self.emit(AuthEvent::SessionUnavailable {
                    reason: e.to_string(),
                });
                return Err(AuthError::Provider(e.to_string()));
            }
            Err(_) => {
                let timeout_ms = self.token_timeout.as_millis() as u64;
                warn!(timeout_ms, "Access token request timed out");
                self.emit(AuthEvent::TokenTimedOut { timeout_ms });
                return Err(AuthError::TokenTimeout { timeout_ms });
            }
        };

        if session.access_token.is_empty() {
            self.emit(AuthEvent::SessionUnavailable {
                reason: "empty access token".to_string(),
            });
            return Err(AuthError::NoClientAvailable(
                "session has an empty access token".to_string(),
            ));
        }

        debug!(user_id = %session.user_id, "Authorized client acquired");

        Ok(AuthorizedClient {
            user_id: session.user_id,
            token: AccessToken::new(session.access_token),
            backend: Arc::clone(&self.backend),
            change_feed: Arc::clone(&self.change_feed),
        })
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.event_bus.emit(CoreEvent::Auth(event));
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("token_timeout", &self.token_timeout)
            .finish_non_exhaustive()
    }
}

/// Backend and change-feed access scoped to one user's token.
///
/// Cheap to clone. Holds no lock; the token is captured at authorization
/// time.
#[derive(Clone)]
pub struct AuthorizedClient {
    user_id: String,
    token: AccessToken,
    backend: Arc<dyn BackendClient>,
    change_feed: Arc<dyn ChangeFeed>,
}

impl AuthorizedClient {
    /// The acting user
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn select(&self, query: SelectQuery) -> BridgeResult<BackendResponse> {
        self.backend.select(self.token.expose(), query).await
    }

    pub async fn insert(&self, table: &str, row: Value) -> BridgeResult<BackendResponse> {
        let mutation = Mutation::Insert {
            table: table.to_string(),
            row,
        };
        self.backend.mutate(self.token.expose(), mutation).await
    }

    pub async fn delete(&self, table: &str, filters: Vec<Filter>) -> BridgeResult<BackendResponse> {
        let mutation = Mutation::Delete {
            table: table.to_string(),
            filters,
        };
        self.backend.mutate(self.token.expose(), mutation).await
    }

    pub async fn open_channel(&self, request: ChannelRequest) -> BridgeResult<FeedChannel> {
        self.change_feed
            .open_channel(self.token.expose(), request)
            .await
    }
}

impl fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("user_id", &self.user_id)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

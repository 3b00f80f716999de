//! Host Session Abstraction
//!
//! Authentication itself happens outside the core. The host exposes the
//! current session (acting user + bearer token) through
//! [`AccessTokenProvider`]; the core only asks for it when it is about to
//! talk to the backend or the change feed.

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;

/// Credentials of the signed-in user
#[derive(Clone, PartialEq, Eq)]
pub struct HostSession {
    pub user_id: String,
    pub access_token: String,
}

impl HostSession {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

impl fmt::Debug for HostSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSession")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Source of the current session
///
/// Implementations may refresh tokens internally. Returning `Ok(None)` means
/// nobody is signed in.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn current_session(&self) -> Result<Option<HostSession>>;
}

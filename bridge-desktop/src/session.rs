//! Fixed-session token provider
//!
//! For desktop tools and tests where the host already holds a token. The
//! session can be swapped at runtime (sign-in / sign-out).

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    session::{AccessTokenProvider, HostSession},
};
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    session: RwLock<Option<HostSession>>,
}

impl StaticTokenProvider {
    pub fn new(session: HostSession) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }

    /// Provider with nobody signed in
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn set_session(&self, session: Option<HostSession>) {
        *self.session.write() = session;
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn current_session(&self) -> Result<Option<HostSession>> {
        Ok(self.session.read().clone())
    }
}

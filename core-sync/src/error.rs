use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Channel error on {registry}: {message}")]
    ChannelError { registry: String, message: String },

    #[error("Channel timed out on {registry}")]
    TimedOut { registry: String },

    #[error("Channel closed by provider on {registry}")]
    ChannelClosed { registry: String },

    /// A display-field lookup for a realtime row failed
    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Change feed error: {0}")]
    Feed(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

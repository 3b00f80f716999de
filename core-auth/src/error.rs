use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Nobody is signed in, or the session could not be turned into a client
    #[error("No client available: {0}")]
    NoClientAvailable(String),

    #[error("Access token request timed out after {timeout_ms}ms")]
    TokenTimeout { timeout_ms: u64 },

    #[error("Session provider failed: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

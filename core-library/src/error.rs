use bridge_traits::{error::BridgeError, BackendResponse};
use core_auth::AuthError;
use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Network error: {0}")]
    Network(#[from] BridgeError),

    /// Non-2xx answer. Displays exactly the server-provided message.
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },
}

impl LibraryError {
    /// Server error from a non-2xx response, falling back to a
    /// status-derived message when the body carries none.
    pub fn from_response(response: &BackendResponse) -> Self {
        let message = response
            .error_message()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed with status {}", response.status));

        LibraryError::Server {
            status: response.status,
            message,
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_server_error_displays_server_message() {
        let response = BackendResponse::new(400, json!({ "error": "Song already in library" }));
        let err = LibraryError::from_response(&response);
        assert_eq!(err.to_string(), "Song already in library");
        assert!(matches!(err, LibraryError::Server { status: 400, .. }));
    }

    #[test]
    fn test_server_error_generic_message() {
        let err = LibraryError::from_response(&BackendResponse::new(503, Value::Null));
        assert_eq!(err.to_string(), "Request failed with status 503");
    }

    #[test]
    fn test_auth_failures_keep_their_kind() {
        let err = LibraryError::from(AuthError::TokenTimeout { timeout_ms: 250 });
        assert!(matches!(err, LibraryError::Auth(AuthError::TokenTimeout { timeout_ms: 250 })));

        let err = LibraryError::from(AuthError::NoClientAvailable("not signed in".to_string()));
        assert!(matches!(err, LibraryError::Auth(AuthError::NoClientAvailable(_))));
        assert_eq!(
            err.to_string(),
            AuthError::NoClientAvailable("not signed in".to_string()).to_string()
        );
    }
}

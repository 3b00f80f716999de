use std::fmt;

/// Bearer token of the signed-in user.
///
/// `Debug` and `Display` never print the token itself.
///
/// # Examples
///
/// ```
/// use core_auth::AccessToken;
///
/// let token = AccessToken::new("eyJhbGciOi...");
/// assert_eq!(format!("{:?}", token), "AccessToken([REDACTED])");
/// assert_eq!(token.expose(), "eyJhbGciOi...");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token for the transport layer
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_redacted() {
        let token = AccessToken::new("secret");
        assert!(!format!("{:?}", token).contains("secret"));
        assert!(!token.to_string().contains("secret"));
        assert_eq!(token.expose(), "secret");
    }
}

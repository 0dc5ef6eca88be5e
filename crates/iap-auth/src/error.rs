//! Error types for IAP authentication operations

/// Errors from IAP authentication operations.
///
/// Cache-layer variants (`NotFound`, `CredentialParse`, `Io`) are recovered
/// by [`AuthSession`](crate::AuthSession) and never reach the end user on
/// their own. `MalformedUrl` and `Acquisition` are the fatal ones.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("user interaction required: {0}")]
    InteractionRequired(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not obtain an IAP token for {origin}: {reason}")]
    Acquisition { origin: String, reason: String },
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_error_names_origin() {
        let err = Error::Acquisition {
            origin: "https://git.example.com".into(),
            reason: "browser login cancelled".into(),
        };
        assert_eq!(
            err.to_string(),
            "could not obtain an IAP token for https://git.example.com: browser login cancelled"
        );
    }

    #[test]
    fn error_debug_includes_variant() {
        let debug = format!("{:?}", Error::MalformedUrl("nope".into()));
        assert!(debug.contains("MalformedUrl"), "got: {debug}");
    }
}

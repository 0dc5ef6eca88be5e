//! Helper-specific error types

use thiserror::Error;

/// Failures of the git collaborator and of local configuration.
///
/// Token resolution failures come from `iap_auth::Error` and are wrapped
/// with `anyhow` context in `main`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("git executable not found: {0}")]
    GitNotFound(String),

    #[error("git config {key} failed: {message}")]
    GitConfig { key: String, message: String },

    #[error("{key} is not configured for {origin}; run `configure` first")]
    MissingSetting { key: String, origin: String },

    #[error("git remote-https could not be started: {0}")]
    Passthrough(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias using helper Error
pub type Result<T> = std::result::Result<T, Error>;

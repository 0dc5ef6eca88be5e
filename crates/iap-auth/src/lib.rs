//! Google Cloud IAP credential library
//!
//! Obtains, caches and reuses the signed bearer token that lets git talk to
//! a repository host sitting behind an Identity-Aware Proxy. This crate is a
//! standalone library with no dependency on the remote helper binary.
//!
//! Resolution flow:
//! 1. Caller normalizes the repository URL with `Origin::parse()`
//! 2. `AuthSession::resolve()` reads the origin's cookie file via
//!    `CredentialStore::load()` and reuses the token if it has not expired
//! 3. Otherwise an `Acquisition` runs silently (stored refresh token),
//!    escalating once to an interactive browser login
//! 4. The fresh credential is written back with `CredentialStore::save()`

pub mod acquire;
pub mod callback;
pub mod constants;
pub mod cookie;
pub mod credentials;
pub mod error;
pub mod oauth;
pub mod origin;
pub mod pkce;
pub mod refresh_tokens;
pub mod secret;
pub mod session;
pub mod token;

pub use acquire::{Acquisition, GoogleIapAcquisition, IapSettings, SettingsSource};
pub use constants::*;
pub use cookie::{CachedCredential, Cookie};
pub use credentials::CredentialStore;
pub use error::{Error, Result};
pub use oauth::{Endpoints, HelperClient};
pub use origin::Origin;
pub use refresh_tokens::RefreshTokenStore;
pub use secret::Secret;
pub use session::{AuthSession, SessionOptions};
pub use token::{Claims, Token};

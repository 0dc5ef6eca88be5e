//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! The browser login is a desktop-app authorization code flow with a
//! loopback redirect. The verifier stays in this process and is sent with
//! the code exchange; the S256 challenge goes into the authorization URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::constants::SCOPES;
use crate::error::{Error, Result};

/// Generate a cryptographically random PKCE code verifier.
///
/// 64 random bytes encoded as URL-safe base64 (no padding): 86 characters,
/// inside RFC 7636's 43-128 range.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Parameters of one authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub endpoint: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    /// Opaque CSRF value echoed back on the redirect
    pub state: &'a str,
    pub challenge: &'a str,
}

/// Build the full authorization URL with all required OAuth parameters.
///
/// `access_type=offline` and `prompt=consent` make Google return a refresh
/// token on every login, which the silent path depends on.
pub fn build_authorization_url(request: &AuthorizationRequest<'_>) -> Result<String> {
    let mut url = Url::parse(request.endpoint)
        .map_err(|e| Error::Config(format!("authorization endpoint {}: {e}", request.endpoint)))?;
    url.query_pairs_mut()
        .append_pair("client_id", request.client_id)
        .append_pair("redirect_uri", request.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", SCOPES)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", request.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", request.state);
    Ok(url.into())
}

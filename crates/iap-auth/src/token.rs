//! Signed IAP bearer token
//!
//! IAP accepts a Google-signed OIDC ID token. The helper never verifies the
//! signature (the proxy does); it only reads the claims it needs to decide
//! whether a cached token can be replayed.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Claims read from the token payload.
///
/// `exp` is an absolute unix timestamp in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "exp")]
    pub expires_at: i64,
    #[serde(default, rename = "sub")]
    pub subject: String,
    #[serde(default, rename = "iss")]
    pub issuer: String,
    #[serde(default, rename = "aud", skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A decoded token and the exact string it was decoded from.
///
/// Immutable: the only constructor is [`Token::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    raw: String,
    claims: Claims,
}

impl Token {
    /// Decode a compact JWS (`header.payload.signature`).
    pub fn decode(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let mut segments = raw.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(Error::CredentialParse(
                "token is not a three-segment JWT".into(),
            ));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| Error::CredentialParse(format!("token payload is not base64url: {e}")))?;
        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| Error::CredentialParse(format!("token claims: {e}")))?;

        Ok(Self {
            raw: raw.to_owned(),
            claims,
        })
    }

    /// The encoded token, used verbatim as the bearer value.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn expires_at(&self) -> i64 {
        self.claims.expires_at
    }

    /// Expired once `now` has moved past `exp`. No leeway is applied.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.claims.expires_at < now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }
}

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Build an unsigned token carrying the given claims. Test helper shared by
/// the crate's test modules.
#[cfg(test)]
pub(crate) fn encode_test_token(claims: &Claims) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

#[cfg(test)]
pub(crate) fn test_claims(expires_at: i64) -> Claims {
    Claims {
        expires_at,
        subject: "112233445566778899".into(),
        issuer: "https://accounts.google.com".into(),
        audience: Some("iap-client.apps.googleusercontent.com".into()),
        email: Some("dev@example.com".into()),
    }
}

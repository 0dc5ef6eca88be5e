//! Origin normalization
//!
//! IAP is configured per host, not per repository path, so every cache and
//! config lookup keys off `https://<host>[:port]`. Remote URLs arrive in many
//! shapes (`https+iap://`, `https://user@host/org/repo.git?x=y`); all of them
//! collapse to the same origin.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// Placeholder substituted for `*` in wildcard hosts when deriving file names.
const WILDCARD_SLUG: &str = "_wildcard_";

/// Normalized HTTPS origin used as the cache key.
///
/// Always `https://<lowercase host>` with an optional non-default port.
/// Constructing an `Origin` from its own string form yields an equal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    host: String,
    port: Option<u16>,
}

impl Origin {
    /// Normalize any absolute URL into an origin.
    ///
    /// Scheme, userinfo, path, query and fragment are discarded. A port is
    /// kept unless it is the HTTPS default.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| Error::MalformedUrl(format!("{input}: {e}")))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::MalformedUrl(format!("{input}: URL has no host")))?
            .to_ascii_lowercase();

        let port = url.port().filter(|p| *p != 443);

        Ok(Self { host, port })
    }

    /// Host without port, e.g. `git.example.com` or `*.example.com`.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Host plus `:port` when a non-default port is present.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }

    /// Whether this origin covers every subdomain (`https://*.example.com`).
    pub fn is_wildcard(&self) -> bool {
        self.host.starts_with("*.")
    }

    /// Whether a wildcard origin covers `host`. Non-wildcard origins only
    /// match their own host.
    pub fn covers(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self.host.strip_prefix('*') {
            Some(suffix) => host.ends_with(suffix) && host.len() > suffix.len(),
            None => host == self.host,
        }
    }

    /// File-name-safe, injective encoding of the authority.
    ///
    /// Lowercase ASCII letters and digits pass through, `.` becomes `-`,
    /// `*` becomes `_wildcard_`, every other byte becomes `_` plus two hex
    /// digits. `_` only ever starts an escape, so two different origins
    /// cannot share a slug and a wildcard origin never collides with a
    /// literal subdomain.
    pub fn slug(&self) -> String {
        let authority = self.authority();
        let mut slug = String::with_capacity(authority.len());
        for byte in authority.bytes() {
            match byte {
                b'a'..=b'z' | b'0'..=b'9' => slug.push(byte as char),
                b'.' => slug.push('-'),
                b'*' => slug.push_str(WILDCARD_SLUG),
                other => slug.push_str(&format!("_{other:02x}")),
            }
        }
        slug
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "https://{}", self.authority())
    }
}

impl std::str::FromStr for Origin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

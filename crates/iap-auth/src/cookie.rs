//! Cached IAP credential and its cookie-jar representation
//!
//! The persisted form is a Netscape cookie file, the format git (through
//! libcurl) reads from `http.cookieFile`. The cookie value is the token
//! string exactly as it was issued: IAP validates that form, so it is never
//! re-encoded from the decoded claims.

use std::fmt;

use crate::constants::COOKIE_NAME;
use crate::error::{Error, Result};
use crate::origin::Origin;
use crate::token::Token;

const COOKIE_FILE_HEADER: &str = "# Netscape HTTP Cookie File";

/// One cookie-jar record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// Expiry in unix seconds
    pub expires: i64,
    pub name: String,
    /// Raw value, replayed byte-for-byte
    pub value: String,
}

impl Cookie {
    /// Parse a single tab-separated cookie-jar line.
    fn parse_line(line: &str) -> Result<Self> {
        let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
        let fields: Vec<&str> = line.split('\t').collect();
        let &[domain, include_subdomains, path, secure, expires, name, value] = fields.as_slice() else {
            return Err(Error::CredentialParse(format!(
                "cookie line has {} fields, expected 7",
                fields.len()
            )));
        };

        let expires = expires
            .parse()
            .map_err(|e| Error::CredentialParse(format!("cookie expiry {expires:?}: {e}")))?;

        Ok(Self {
            domain: domain.to_owned(),
            include_subdomains: parse_flag(include_subdomains)?,
            path: path.to_owned(),
            secure: parse_flag(secure)?,
            expires,
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            flag(self.include_subdomains),
            self.path,
            flag(self.secure),
            self.expires,
            self.name,
            self.value
        )
    }
}

fn flag(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        other => Err(Error::CredentialParse(format!(
            "cookie flag must be TRUE or FALSE, got {other:?}"
        ))),
    }
}

/// A token paired with the cookie record that replays it.
///
/// `cookie.value` always decodes to `token`: both constructors derive one
/// from the same string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCredential {
    token: Token,
    cookie: Cookie,
}

impl CachedCredential {
    /// Wrap a freshly issued token for `origin`.
    pub fn issue(origin: &Origin, raw_token: &str) -> Result<Self> {
        let token = Token::decode(raw_token)?;

        // A wildcard origin maps to a domain cookie that curl sends to every
        // matching subdomain.
        let (domain, include_subdomains) = match origin.host().strip_prefix('*') {
            Some(suffix) => (suffix.to_owned(), true),
            None => (origin.host().to_owned(), false),
        };

        let cookie = Cookie {
            domain,
            include_subdomains,
            path: "/".into(),
            secure: true,
            expires: token.expires_at(),
            name: COOKIE_NAME.into(),
            value: token.raw().to_owned(),
        };

        Ok(Self { token, cookie })
    }

    /// Parse the contents of a cookie file.
    ///
    /// Comment and blank lines are skipped, as are records that belong to
    /// other cookies or do not parse; the first valid [`COOKIE_NAME`]
    /// record is used.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut first_error = None;
        let records = contents
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .filter(|line| line.starts_with("#HttpOnly_") || !line.starts_with('#'));

        for line in records {
            match Cookie::parse_line(line) {
                Ok(cookie) if cookie.name == COOKIE_NAME => {
                    let token = Token::decode(&cookie.value)?;
                    return Ok(Self { token, cookie });
                }
                Ok(_) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| {
            Error::CredentialParse(format!("no {COOKIE_NAME} record in cookie file"))
        }))
    }

    /// Render the full cookie file.
    pub fn to_file_contents(&self) -> String {
        format!("{COOKIE_FILE_HEADER}\n{}\n", self.cookie)
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn into_token(self) -> Token {
        self.token
    }

    pub fn cookie(&self) -> &Cookie {
        &self.cookie
    }

    /// The exact string replayed as the cookie value.
    pub fn raw_cookie_value(&self) -> &str {
        &self.cookie.value
    }
}

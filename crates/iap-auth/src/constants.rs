//! Google OAuth and IAP constants
//!
//! Endpoints default to Google's public OAuth service. Client IDs and the
//! helper secret are per-host values read from git configuration, never
//! compiled in.

/// Authorization endpoint for the interactive (browser) flow
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Token endpoint for code exchange and refresh-token exchange
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Scopes requested during browser login. `openid` is what makes the token
/// endpoint return an `id_token` that IAP accepts.
pub const SCOPES: &str = "openid email";

/// Name of the cookie written to the per-origin cookie file.
pub const COOKIE_NAME: &str = "GCP_IAP_AUTH_TOKEN";

/// Directory (relative to the home directory) holding cookie files and
/// refresh tokens.
pub const CONFIG_SUBDIR: &str = ".config/gcp-iap";

/// File name of the refresh token store inside the cache directory.
pub const REFRESH_TOKEN_FILE: &str = "refresh_tokens.json";

/// Extension of per-origin cookie files.
pub const COOKIE_FILE_EXTENSION: &str = "cookie";

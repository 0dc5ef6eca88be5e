//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults.
//! The file is optional; when the default path does not exist the defaults
//! apply. OAuth client credentials are never read from this file: they live
//! in git configuration, per origin.

use std::path::{Path, PathBuf};

use iap_auth::{AUTHORIZE_ENDPOINT, CONFIG_SUBDIR, CredentialStore, Endpoints, TOKEN_ENDPOINT};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Env var naming an alternative config file
pub const CONFIG_ENV: &str = "GIT_IAP_CONFIG";

/// Env vars that force debug logging when set to a true boolean
pub const DEBUG_ENVS: [&str; 2] = ["GIT_IAP_VERBOSE", "DEBUG"];

const CONFIG_FILE: &str = "config.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cache: CacheConfig,
    pub logging: LogConfig,
    pub oauth: OAuthConfig,
}

/// Credential cache settings
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Overrides `~/.config/gcp-iap`
    pub dir: Option<PathBuf>,
    /// Report cookie file write failures at warn level (debug otherwise)
    pub warn_on_save_failure: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            warn_on_save_failure: true,
        }
    }
}

/// Log output settings. Logs always go to stderr.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "error".into(),
            json: false,
        }
    }
}

/// OAuth endpoint overrides
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OAuthConfig {
    pub auth_endpoint: String,
    pub token_endpoint: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            auth_endpoint: AUTHORIZE_ENDPOINT.into(),
            token_endpoint: TOKEN_ENDPOINT.into(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;

        config.validate()?;
        config.apply_env();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults unless
    /// the path was asked for explicitly.
    pub fn load_or_default(path: &Path, explicit: bool) -> Result<Self> {
        if !explicit && !path.exists() {
            let mut config = Config::default();
            config.apply_env();
            return Ok(config);
        }
        Self::load(path)
    }

    fn validate(&self) -> Result<()> {
        for (name, endpoint) in [
            ("auth_endpoint", &self.oauth.auth_endpoint),
            ("token_endpoint", &self.oauth.token_endpoint),
        ] {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(Error::Config(format!(
                    "{name} must start with http:// or https://, got: {endpoint}"
                )));
            }
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(Error::Config(format!(
                "logging.level must be one of error, warn, info, debug, trace, got: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    fn apply_env(&mut self) {
        let verbose = DEBUG_ENVS.iter().any(|name| {
            std::env::var(name)
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false)
        });
        if verbose {
            self.logging.level = "debug".into();
        }
    }

    /// Resolve config file path from CLI arg, GIT_IAP_CONFIG env var or the
    /// default location. The flag is true when the path was given explicitly.
    pub fn resolve_path(cli_path: Option<&Path>) -> (PathBuf, bool) {
        if let Some(p) = cli_path {
            return (p.to_path_buf(), true);
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            return (PathBuf::from(p), true);
        }
        let dir = dirs::home_dir()
            .map(|home| home.join(CONFIG_SUBDIR))
            .unwrap_or_else(|| PathBuf::from(CONFIG_SUBDIR));
        (dir.join(CONFIG_FILE), false)
    }

    /// Directory holding cookie files and refresh tokens.
    pub fn cache_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.cache.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(CredentialStore::default_dir()?),
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            authorize: self.oauth.auth_endpoint.clone(),
            token: self.oauth.token_endpoint.clone(),
        }
    }
}

/// Boolean env values: `1`, `t`, `true` and `0`, `f`, `false` in any case.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    pub(crate) static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    pub(crate) unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    pub(crate) unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_debug_env() {
        for name in DEBUG_ENVS {
            unsafe { remove_env(name) };
        }
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_full_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_debug_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[cache]
dir = "/var/cache/gcp-iap"
warn_on_save_failure = false

[logging]
level = "info"
json = true

[oauth]
auth_endpoint = "http://127.0.0.1:9000/auth"
token_endpoint = "http://127.0.0.1:9000/token"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache.dir, Some(PathBuf::from("/var/cache/gcp-iap")));
        assert!(!config.cache.warn_on_save_failure);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.json);
        assert_eq!(config.endpoints().token, "http://127.0.0.1:9000/token");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_debug_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "");

        let config = Config::load(&path).unwrap();
        assert!(config.cache.dir.is_none());
        assert!(config.cache.warn_on_save_failure);
        assert_eq!(config.logging.level, "error");
        assert!(!config.logging.json);
        assert_eq!(config.endpoints(), Endpoints::default());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_default_file_yields_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_debug_env();
        let config =
            Config::load_or_default(Path::new("/nonexistent/path/config.toml"), false).unwrap();
        assert_eq!(config.logging.level, "error");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load_or_default(Path::new("/nonexistent/path/config.toml"), true);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[cache]\nttl = 5\n");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[oauth]\ntoken_endpoint = \"oauth2.googleapis.com/token\"\n");
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("token_endpoint"), "got: {err}");
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[logging]\nlevel = \"loud\"\n");
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("logging.level"), "got: {err}");
    }

    #[test]
    fn test_verbose_env_forces_debug() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_debug_env();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[logging]\nlevel = \"warn\"\n");

        unsafe { set_env("GIT_IAP_VERBOSE", "true") };
        assert_eq!(Config::load(&path).unwrap().logging.level, "debug");
        unsafe { remove_env("GIT_IAP_VERBOSE") };

        unsafe { set_env("DEBUG", "1") };
        assert_eq!(Config::load(&path).unwrap().logging.level, "debug");
        unsafe { remove_env("DEBUG") };

        unsafe { set_env("DEBUG", "false") };
        assert_eq!(Config::load(&path).unwrap().logging.level, "warn");
        unsafe { remove_env("DEBUG") };

        unsafe { set_env("DEBUG", "yes please") };
        assert_eq!(
            Config::load(&path).unwrap().logging.level,
            "warn",
            "unparseable booleans are ignored"
        );
        unsafe { remove_env("DEBUG") };
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let (path, explicit) = Config::resolve_path(Some(Path::new("/custom/path.toml")));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
        assert!(explicit);
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env(CONFIG_ENV, "/env/path.toml") };
        let (path, explicit) = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        assert!(explicit);
        unsafe { remove_env(CONFIG_ENV) };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env(CONFIG_ENV) };
        let (path, explicit) = Config::resolve_path(None);
        assert!(path.ends_with(".config/gcp-iap/config.toml"), "got {}", path.display());
        assert!(!explicit);
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env(CONFIG_ENV, "/env/should-lose.toml") };
        let (path, _) = Config::resolve_path(Some(Path::new("/cli/wins.toml")));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over GIT_IAP_CONFIG env var"
        );
        unsafe { remove_env(CONFIG_ENV) };
    }

    #[test]
    fn test_cache_dir_override() {
        let config = Config {
            cache: CacheConfig {
                dir: Some(PathBuf::from("/tmp/iap-cache")),
                ..CacheConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/iap-cache"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("t"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool(""), None);
    }
}

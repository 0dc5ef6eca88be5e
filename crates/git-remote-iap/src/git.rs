//! Git collaborator
//!
//! Everything the helper needs from git goes through the `git` executable:
//! per-origin settings are read with `git config --get-urlmatch`, global
//! settings are written with `git config --global`, and the actual transport
//! is delegated to `git remote-https`.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Output};

use iap_auth::{HelperClient, IapSettings, Origin, Secret, Token};
use tracing::debug;

use crate::error::{Error, Result};

const HELPER_ID_KEY: &str = "iap.helperID";
const HELPER_SECRET_KEY: &str = "iap.helperSecret";
const CLIENT_ID_KEY: &str = "iap.clientID";

/// Handle on the `git` executable.
#[derive(Debug, Clone)]
pub struct Git {
    program: OsString,
    global_config: Option<PathBuf>,
}

impl Default for Git {
    fn default() -> Self {
        Self {
            program: "git".into(),
            global_config: None,
        }
    }
}

impl Git {
    /// Point `--global` reads and writes at `path` instead of `~/.gitconfig`.
    pub fn with_global_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config = Some(path.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(path) = &self.global_config {
            cmd.env("GIT_CONFIG_GLOBAL", path)
                .env("GIT_CONFIG_NOSYSTEM", "1");
        }
        cmd
    }

    fn output(&self, cmd: &mut Command, key: &str) -> Result<Output> {
        cmd.output().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::GitNotFound(e.to_string()),
            _ => Error::GitConfig {
                key: key.to_owned(),
                message: e.to_string(),
            },
        })
    }

    /// Value of `key` for the best matching `<section>.<url>.<name>` entry.
    /// `None` when no entry matches.
    pub fn get_urlmatch(&self, key: &str, url: &str) -> Result<Option<String>> {
        let output = self.output(
            self.command()
                .args(["config", "--get-urlmatch", key, url]),
            key,
        )?;

        match output.status.code() {
            Some(0) => {
                let value = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                Ok(Some(value))
            }
            // git exits 1 when the key is not set
            Some(1) => Ok(None),
            _ => Err(Error::GitConfig {
                key: key.to_owned(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }),
        }
    }

    /// `git config --global <key> <value>`
    pub fn set_global(&self, key: &str, value: &str) -> Result<()> {
        debug!(key, "setting global git config");
        let output = self.output(
            self.command().args(["config", "--global", key, value]),
            key,
        )?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::GitConfig {
                key: key.to_owned(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    /// Read the OAuth clients configured for `origin`.
    pub fn iap_settings(&self, origin: &Origin) -> Result<IapSettings> {
        let url = origin.to_string();
        let require = |key: &str| -> Result<String> {
            self.get_urlmatch(key, &url)?
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::MissingSetting {
                    key: key.to_owned(),
                    origin: url.clone(),
                })
        };

        Ok(IapSettings {
            helper: HelperClient {
                id: require(HELPER_ID_KEY)?,
                secret: Secret::new(require(HELPER_SECRET_KEY)?),
            },
            client_id: require(CLIENT_ID_KEY)?,
        })
    }

    /// Origins that have an `iap.<url>.clientID` entry, wildcards included.
    pub fn configured_origins(&self) -> Result<Vec<Origin>> {
        let key = r"^iap\..*\.clientid$";
        let output = self.output(
            self.command().args(["config", "--get-regexp", key]),
            key,
        )?;

        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(|line| line.split_whitespace().next())
                .filter_map(|key| key.strip_prefix("iap.")?.strip_suffix(".clientid"))
                .filter_map(|url| Origin::parse(url).ok())
                .collect()),
            Some(1) => Ok(vec![]),
            _ => Err(Error::GitConfig {
                key: key.to_owned(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }),
        }
    }

    /// Allow git to use the `<name>://` remote helper protocol.
    pub fn install_protocol(&self, name: &str) -> Result<()> {
        self.set_global(&format!("protocol.{name}.allow"), "always")
    }

    /// Hand the transport over to `git remote-https` with the token attached.
    ///
    /// The child inherits stdio, so it speaks the remote-helper protocol with
    /// the parent git directly. The token travels through the environment,
    /// never on the command line.
    pub fn remote_https(&self, remote: &str, url: &str, token: &Token) -> Result<ExitStatus> {
        let https_url = to_https_url(url);
        debug!(remote, url = %https_url, "passing through to git remote-https");

        let existing = std::env::var("GIT_CONFIG_COUNT").ok();
        self.command()
            .args(["remote-https", remote, &https_url])
            .envs(extra_header_env(existing.as_deref(), token))
            .status()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::GitNotFound(e.to_string()),
                _ => Error::Passthrough(e.to_string()),
            })
    }
}

/// Rewrite the remote's scheme (`https+iap`, `iap`, ...) to `https`,
/// keeping host, path and query.
pub fn to_https_url(url: &str) -> String {
    match url.split_once("://") {
        Some((_, rest)) => format!("https://{rest}"),
        None => url.to_owned(),
    }
}

/// `GIT_CONFIG_*` variables adding one `http.extraHeader` entry after any
/// entries the caller's environment already defines.
pub fn extra_header_env(existing_count: Option<&str>, token: &Token) -> Vec<(String, String)> {
    let index = existing_count
        .and_then(|n| n.trim().parse::<usize>().ok())
        .unwrap_or(0);
    vec![
        ("GIT_CONFIG_COUNT".into(), (index + 1).to_string()),
        (format!("GIT_CONFIG_KEY_{index}"), "http.extraHeader".into()),
        (
            format!("GIT_CONFIG_VALUE_{index}"),
            format!("Proxy-Authorization: Bearer {}", token.raw()),
        ),
    ]
}

/// Origin whose cookie file serves `requested`.
///
/// A host configured through a wildcard entry shares the wildcard's cookie
/// file, which is where `configure` points `http.cookieFile`. An exact entry
/// wins over wildcards, and the longest matching wildcard wins over shorter
/// ones.
pub fn cache_origin(requested: &Origin, configured: &[Origin]) -> Origin {
    if configured.contains(requested) {
        return requested.clone();
    }
    configured
        .iter()
        .filter(|o| o.is_wildcard() && o.port() == requested.port() && o.covers(requested.host()))
        .max_by_key(|o| o.host().len())
        .cloned()
        .unwrap_or_else(|| requested.clone())
}

/// Protocol name served by a binary called `git-remote-<name>`.
pub fn protocol_name(binary_name: &str) -> &str {
    binary_name
        .strip_prefix("git-remote-")
        .filter(|name| !name.is_empty())
        .unwrap_or(binary_name)
}

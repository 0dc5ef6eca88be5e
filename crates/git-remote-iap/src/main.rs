//! git remote helper for Google Cloud Identity-Aware Proxy
//!
//! Single binary that:
//! 1. Resolves an IAP token for the remote's host (cache, refresh token,
//!    then browser login)
//! 2. Runs `git remote-https` with the token attached as a bearer header
//! 3. Offers `check`, `print`, `install` and `configure` for humans

mod cli;
mod config;
mod configure;
mod error;
mod git;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use iap_auth::{
    AuthSession, CredentialStore, GoogleIapAcquisition, Origin, REFRESH_TOKEN_FILE,
    RefreshTokenStore, Secret, SessionOptions, SettingsSource, Token,
};
use tracing::{Dispatch, debug, info, warn};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::configure::ConfigureRequest;
use crate::git::Git;

const DEFAULT_BINARY_NAME: &str = "git-remote-iap";

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let (config_path, explicit) = Config::resolve_path(cli.config.as_deref());
    let config = Config::load_or_default(&config_path, explicit)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let dispatch = logging::dispatch(&config.logging);
    let _log_guard = tracing::dispatcher::set_default(&dispatch);
    debug!(path = %config_path.display(), "configuration loaded");

    let git = Git::default();
    let binary = binary_name();

    match cli.command {
        None => {
            let (Some(remote), Some(url)) = (cli.remote, cli.url) else {
                anyhow::bail!("usage: {binary} <remote> <url>");
            };
            debug!(remote = %remote, url = %url, "remote helper invoked");
            let token = resolve(&config, &git, &dispatch, &url, false)?;
            let status = git
                .remote_https(&remote, &url, &token)
                .context("failed to run git remote-https")?;
            Ok(exit_code(status))
        }

        Some(Command::Check {
            args,
            force_browser,
        }) => {
            let url = args.last().context("check needs a remote URL")?;
            debug!(url = %url, force_browser, "check");
            resolve(&config, &git, &dispatch, url, force_browser)?;
            Ok(ExitCode::SUCCESS)
        }

        Some(Command::Print { url }) => {
            let token = resolve(&config, &git, &dispatch, &url, false)?;
            println!("{}", token.raw());
            Ok(ExitCode::SUCCESS)
        }

        Some(Command::Version) => {
            println!("{binary} {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }

        Some(Command::Install) => {
            let protocol = git::protocol_name(&binary);
            git.install_protocol(protocol)
                .context("failed to install protocol")?;
            info!(protocol, "protocol configured in git");
            eprintln!("{protocol} protocol configured in git");
            Ok(ExitCode::SUCCESS)
        }

        Some(Command::Configure {
            repo_url,
            helper_id,
            helper_secret,
            client_id,
            helper_name,
        }) => {
            let store = CredentialStore::new(config.cache_dir()?);
            let helper_secret = Secret::new(helper_secret);
            let plan = configure::plan(
                &ConfigureRequest {
                    repo_url: &repo_url,
                    helper_id: &helper_id,
                    helper_secret: &helper_secret,
                    client_id: &client_id,
                    helper_name: &helper_name,
                },
                &store,
            )?;

            info!(origin = %plan.origin, "configuring IAP");
            for (key, value) in &plan.entries {
                git.set_global(key, value)?;
            }
            if let Some(command) = &plan.manual_instead_of {
                warn!(
                    origin = %plan.origin,
                    "wildcard hosts need a manual insteadOf entry for https:// remotes"
                );
                eprintln!(
                    "While config is valid for wildcard hosts, transparent support for https:// remotes requires \"insteadOf\" config.\n\
                     Configure each actual host as follows (with * replaced by the subdomain):\n\n    {command}\n"
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Resolve a token for the host of `url` on a single-threaded runtime.
fn resolve(
    config: &Config,
    git: &Git,
    dispatch: &Dispatch,
    url: &str,
    force_interactive: bool,
) -> Result<Token> {
    let requested = Origin::parse(url)?;
    let origin = match git.configured_origins() {
        Ok(configured) => git::cache_origin(&requested, &configured),
        Err(e) => {
            debug!(error = %e, "could not list configured origins");
            requested.clone()
        }
    };
    if origin != requested {
        debug!(origin = %origin, host = %requested, "using wildcard cookie file");
    }
    let cache_dir = config.cache_dir()?;

    // Settings are only read when the cache cannot serve the request.
    let settings_git = git.clone();
    let settings: SettingsSource = Arc::new(move |_: &Origin| {
        settings_git
            .iap_settings(&requested)
            .map_err(|e| iap_auth::Error::Config(e.to_string()))
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        let refresh_tokens = Arc::new(
            RefreshTokenStore::load_or_empty(cache_dir.join(REFRESH_TOKEN_FILE)).await,
        );
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        let acquisition =
            GoogleIapAcquisition::new(http, config.endpoints(), settings, refresh_tokens);

        let session = AuthSession::new(
            CredentialStore::new(cache_dir),
            Arc::new(acquisition),
            SessionOptions {
                warn_on_save_failure: config.cache.warn_on_save_failure,
                dispatch: Some(dispatch.clone()),
            },
        );

        let token = session.resolve(&origin, force_interactive).await?;
        Ok::<_, anyhow::Error>(token)
    })
}

fn binary_name() -> String {
    std::env::args_os()
        .next()
        .and_then(|arg0| {
            std::path::Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| DEFAULT_BINARY_NAME.into())
}

fn exit_code(status: std::process::ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use iap_auth::CachedCredential;

    use super::*;

    // {"exp":4102444800,"sub":"u"}
    const RAW_TOKEN: &str = "eyJhbGciOiJub25lIn0.eyJleHAiOjQxMDI0NDQ4MDAsInN1YiI6InUifQ.sig";

    fn seed_cookie(dir: &std::path::Path, origin: &str) {
        let origin = Origin::parse(origin).unwrap();
        let credential = CachedCredential::issue(&origin, RAW_TOKEN).unwrap();
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(CredentialStore::new(dir).save(&origin, &credential))
            .unwrap();
    }

    fn config_with_cache(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.cache.dir = Some(dir.to_path_buf());
        config
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[test]
    fn cached_token_needs_no_git_settings() {
        let dir = tempfile::tempdir().unwrap();
        seed_cookie(dir.path(), "https://git.example.com");
        let git = Git::default().with_global_config(dir.path().join("gitconfig"));

        let token = resolve(
            &config_with_cache(dir.path()),
            &git,
            &Dispatch::none(),
            "https+iap://git.example.com/org/repo.git",
            false,
        )
        .unwrap();
        assert_eq!(token.raw(), RAW_TOKEN);
    }

    #[test]
    fn missing_settings_fail_once_the_cache_is_empty() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = Git::default().with_global_config(dir.path().join("gitconfig"));

        let err = resolve(
            &config_with_cache(dir.path()),
            &git,
            &Dispatch::none(),
            "https+iap://git.example.com/org/repo.git",
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("iap.helperID"), "got {err:#}");
    }

    #[test]
    fn wildcard_hosts_share_the_wildcard_cookie() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        seed_cookie(dir.path(), "https://*.example.com");
        let git = Git::default().with_global_config(dir.path().join("gitconfig"));
        git.set_global("iap.https://*.example.com.clientID", "wildcard-client")
            .unwrap();

        let token = resolve(
            &config_with_cache(dir.path()),
            &git,
            &Dispatch::none(),
            "https+iap://git.example.com/org/repo.git",
            false,
        )
        .unwrap();
        assert_eq!(token.raw(), RAW_TOKEN);
        assert!(
            !CredentialStore::new(dir.path())
                .path_for(&Origin::parse("https://git.example.com").unwrap())
                .exists()
        );
    }
}

//! Command line interface
//!
//! Invoked by git as `git-remote-<proto> <remote> <url>`; the subcommands
//! are for humans.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "git-remote-iap",
    about = "git remote helper that handles authentication for GCP Identity-Aware Proxy",
    args_conflicts_with_subcommands = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Config file (default: ~/.config/gcp-iap/config.toml, or GIT_IAP_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Name of the remote, as passed by git
    #[arg(requires = "url")]
    pub remote: Option<String>,

    /// URL of the remote, as passed by git
    pub url: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Refresh the token for a remote URL if needed, then exit
    Check {
        /// Remote URL; with several arguments the last one is used
        #[arg(required = true, num_args = 1..)]
        args: Vec<String>,

        /// Skip the refresh token and log in through the browser
        #[arg(short = 'f', long = "forcebrowser")]
        force_browser: bool,
    },

    /// Refresh the token for a remote URL if needed, then print it
    Print { url: String },

    /// Print version number
    Version,

    /// Allow the helper's protocol in the global git config
    Install,

    /// Configure IAP for a given repository
    Configure {
        /// URL of the git repository to configure
        #[arg(long = "repoURL")]
        repo_url: String,

        /// OAuth client ID for the helper
        #[arg(long = "helperID")]
        helper_id: String,

        /// OAuth client secret for the helper
        #[arg(long = "helperSecret")]
        helper_secret: String,

        /// OAuth client ID of the IAP instance
        #[arg(long = "clientID")]
        client_id: String,

        /// Name of the remote helper, e.g. "iap" if PATH has a git-remote-iap binary
        #[arg(long = "helperName", default_value = "https+iap")]
        helper_name: String,
    },
}

//! Log subscriber construction
//!
//! stdout carries the remote-helper protocol and `print` output, so every
//! log line goes to stderr. The subscriber is returned as a `Dispatch` for
//! the caller to scope; nothing is installed globally.

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

use crate::config::LogConfig;

/// Build the dispatch described by `config`. `RUST_LOG` overrides the
/// configured level.
pub fn dispatch(config: &LogConfig) -> Dispatch {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.json {
        Dispatch::new(registry.with(fmt.json()))
    } else {
        Dispatch::new(registry.with(fmt))
    }
}

//! Git settings written by the `configure` subcommand

use iap_auth::{CredentialStore, Origin, Secret};

/// Inputs of `configure`.
pub struct ConfigureRequest<'a> {
    pub repo_url: &'a str,
    pub helper_id: &'a str,
    pub helper_secret: &'a Secret,
    pub client_id: &'a str,
    /// Protocol name of the installed helper, e.g. `https+iap`
    pub helper_name: &'a str,
}

/// Global git settings for one origin.
pub struct ConfigurePlan {
    pub origin: Origin,
    /// `(key, value)` pairs for `git config --global`, in order
    pub entries: Vec<(String, String)>,
    /// Set instead of an `insteadOf` entry when the origin is a wildcard:
    /// git cannot rewrite `https://*.example.com`, so each concrete host
    /// has to be configured by hand.
    pub manual_instead_of: Option<String>,
}

/// Build the settings that route `https://` remotes of the origin through
/// the helper and point git's cookie jar at the helper's cache file.
pub fn plan(request: &ConfigureRequest<'_>, store: &CredentialStore) -> iap_auth::Result<ConfigurePlan> {
    let origin = Origin::parse(request.repo_url)?;
    let url = origin.to_string();

    let mut entries = vec![
        (format!("iap.{url}.helperID"), request.helper_id.to_owned()),
        (
            format!("iap.{url}.helperSecret"),
            request.helper_secret.expose().to_owned(),
        ),
        (format!("iap.{url}.clientID"), request.client_id.to_owned()),
    ];

    let instead_of_key = format!(
        "url.{}://{}.insteadOf",
        request.helper_name,
        origin.authority()
    );
    let manual_instead_of = if origin.is_wildcard() {
        Some(format!("git config --global {instead_of_key} {url}"))
    } else {
        entries.push((instead_of_key, url.clone()));
        None
    };

    entries.push((
        format!("http.{url}.cookieFile"),
        store.path_for(&origin).display().to_string(),
    ));

    Ok(ConfigurePlan {
        origin,
        entries,
        manual_instead_of,
    })
}

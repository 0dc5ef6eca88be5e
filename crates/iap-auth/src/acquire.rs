//! Token acquisition
//!
//! [`Acquisition`] is the seam between the session state machine and the
//! actual login handshake. [`GoogleIapAcquisition`] is the production
//! implementation:
//!
//! - silent: exchange the stored refresh token for an ID token scoped to the
//!   IAP client. Never prompts; fails fast when no refresh token is stored.
//! - interactive: browser login through a loopback redirect, store the new
//!   refresh token, then do the silent exchange.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::callback::LoopbackListener;
use crate::cookie::CachedCredential;
use crate::error::{Error, Result};
use crate::oauth::{self, Endpoints, HelperClient};
use crate::origin::Origin;
use crate::pkce::{self, AuthorizationRequest};
use crate::refresh_tokens::{RefreshEntry, RefreshTokenStore};
use crate::secret::Secret;
use crate::token::unix_now;

/// Future returned by [`Acquisition::obtain`].
pub type AcquireFuture<'a> = Pin<Box<dyn Future<Output = Result<CachedCredential>> + Send + 'a>>;

/// Performs a login handshake for an origin.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Acquisition>`).
pub trait Acquisition: Send + Sync {
    /// Obtain a fresh credential. With `interactive == false` the
    /// implementation must not require user action and should fail fast
    /// when that is impossible.
    fn obtain<'a>(&'a self, origin: &'a Origin, interactive: bool) -> AcquireFuture<'a>;
}

/// Per-host IAP settings, read from git configuration.
#[derive(Debug, Clone)]
pub struct IapSettings {
    /// Desktop OAuth client used to log in (`iap.helperID`/`iap.helperSecret`)
    pub helper: HelperClient,
    /// OAuth client ID of the IAP instance (`iap.clientID`), the token audience
    pub client_id: String,
}

/// Looks up the [`IapSettings`] for an origin. Only consulted when a token
/// actually has to be acquired, so a valid cached token never needs them.
pub type SettingsSource = Arc<dyn Fn(&Origin) -> Result<IapSettings> + Send + Sync>;

/// Opens the authorization URL for the user.
pub type UrlOpener = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Google OAuth implementation of [`Acquisition`].
pub struct GoogleIapAcquisition {
    http: reqwest::Client,
    endpoints: Endpoints,
    settings_source: SettingsSource,
    resolved: Mutex<HashMap<Origin, IapSettings>>,
    refresh_tokens: Arc<RefreshTokenStore>,
    opener: UrlOpener,
}

impl GoogleIapAcquisition {
    pub fn new(
        http: reqwest::Client,
        endpoints: Endpoints,
        settings: SettingsSource,
        refresh_tokens: Arc<RefreshTokenStore>,
    ) -> Self {
        Self {
            http,
            endpoints,
            settings_source: settings,
            resolved: Mutex::new(HashMap::new()),
            refresh_tokens,
            opener: Arc::new(|url: &str| open::that_detached(url)),
        }
    }

    /// Replace how the authorization URL is opened.
    pub fn with_opener(mut self, opener: UrlOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Settings for `origin`. Successful lookups are remembered.
    fn settings(&self, origin: &Origin) -> Result<IapSettings> {
        let remembered = self
            .resolved
            .lock()
            .ok()
            .and_then(|resolved| resolved.get(origin).cloned());
        if let Some(settings) = remembered {
            return Ok(settings);
        }

        let settings = (self.settings_source)(origin)?;
        if let Ok(mut resolved) = self.resolved.lock() {
            resolved.insert(origin.clone(), settings.clone());
        }
        Ok(settings)
    }

    async fn silent(&self, origin: &Origin) -> Result<CachedCredential> {
        let settings = self.settings(origin)?;
        let refresh = self
            .refresh_tokens
            .get(origin, &settings.helper.id)
            .await
            .ok_or_else(|| {
                Error::InteractionRequired(format!("no refresh token stored for {origin}"))
            })?;

        match self.exchange(origin, &settings, &refresh).await {
            Err(Error::InvalidCredentials(msg)) => {
                info!(origin = %origin, "stored refresh token rejected, dropping it");
                if let Err(e) = self.refresh_tokens.remove(origin).await {
                    warn!(origin = %origin, error = %e, "failed to drop rejected refresh token");
                }
                Err(Error::InvalidCredentials(msg))
            }
            other => other,
        }
    }

    async fn interactive(&self, origin: &Origin) -> Result<CachedCredential> {
        let settings = self.settings(origin)?;
        let listener = LoopbackListener::bind().await?;
        let verifier = pkce::generate_verifier();
        let challenge = pkce::compute_challenge(&verifier);
        let state = uuid::Uuid::new_v4().to_string();

        let url = pkce::build_authorization_url(&AuthorizationRequest {
            endpoint: &self.endpoints.authorize,
            client_id: &settings.helper.id,
            redirect_uri: listener.redirect_uri(),
            state: &state,
            challenge: &challenge,
        })?;

        let redirect_uri = listener.redirect_uri().to_owned();
        debug!(origin = %origin, redirect_uri = %redirect_uri, "waiting for browser login");
        if let Err(e) = (self.opener)(&url) {
            debug!(error = %e, "could not open a browser");
            eprintln!("Open the following URL in your browser to authenticate to {origin}:\n\n    {url}\n");
        }

        let code = listener.wait_for_code(&state).await?;
        let tokens = oauth::exchange_code(
            &self.http,
            &self.endpoints,
            &settings.helper,
            &code,
            &verifier,
            &redirect_uri,
        )
        .await?;

        let refresh = tokens.refresh_token.map(Secret::from).ok_or_else(|| {
            Error::TokenExchange("code exchange returned no refresh_token".into())
        })?;

        let entry = RefreshEntry {
            helper_id: settings.helper.id.clone(),
            refresh: refresh.clone(),
            issued_at: unix_now(),
        };
        if let Err(e) = self.refresh_tokens.insert(origin, entry).await {
            warn!(origin = %origin, error = %e, "failed to store refresh token, next run will prompt again");
        }

        self.exchange(origin, &settings, &refresh).await
    }

    async fn exchange(
        &self,
        origin: &Origin,
        settings: &IapSettings,
        refresh: &Secret,
    ) -> Result<CachedCredential> {
        let raw = oauth::id_token_for_audience(
            &self.http,
            &self.endpoints,
            &settings.helper,
            refresh,
            &settings.client_id,
        )
        .await?;
        CachedCredential::issue(origin, &raw)
    }
}

impl Acquisition for GoogleIapAcquisition {
    fn obtain<'a>(&'a self, origin: &'a Origin, interactive: bool) -> AcquireFuture<'a> {
        Box::pin(async move {
            if interactive {
                self.interactive(origin).await
            } else {
                self.silent(origin).await
            }
        })
    }
}

//! Authentication session state machine
//!
//! Pure transition table: [`handle_event`] receives an event and returns
//! `(new_state, action)`. [`AuthSession::resolve`] executes the I/O implied
//! by each action (cache read, expiry check, acquisition, cache write) and
//! feeds the outcome back as the next event.
//!
//! ```text
//! Load ──miss/corrupt──► Acquire(force) ──ok──► Persist ──► Done (fresh)
//!  │                        ▲   │
//!  └─► Validate ──expired───┘   └─fail─► Acquire(interactive) ──fail──► Failed
//!          └──valid──► Done (cached)
//! ```

use std::sync::Arc;

use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, debug, warn};

use crate::acquire::Acquisition;
use crate::cookie::CachedCredential;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::origin::Origin;
use crate::token::{Token, unix_now};

/// Resolution states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    /// Reading the cached credential
    Load { force_interactive: bool },
    /// Checking the cached token's expiry
    Validate { force_interactive: bool },
    /// Running an acquisition
    Acquire { interactive: bool },
    /// Writing the fresh credential to the cache
    Persist,
    /// Terminal: a token is available
    Done,
    /// Terminal: no token could be obtained
    Failed,
}

/// Outcomes of the I/O performed for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveEvent {
    CacheLoaded,
    /// Not found, unreadable or undecodable; all handled alike
    CacheMissing,
    CacheValid,
    CacheExpired,
    Acquired,
    AcquireFailed,
    Persisted,
    /// Caching failed; the fresh credential is still usable
    PersistFailed,
}

/// What the caller should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    LoadCache,
    CheckExpiry,
    Acquire { interactive: bool },
    PersistFresh,
    ReturnCached,
    ReturnFresh,
    Fail,
    /// Event not valid in this state
    None,
}

impl ResolveState {
    /// Initial state and action for a resolution.
    pub fn start(force_interactive: bool) -> (Self, ResolveAction) {
        (Self::Load { force_interactive }, ResolveAction::LoadCache)
    }
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: ResolveState, event: ResolveEvent) -> (ResolveState, ResolveAction) {
    use ResolveAction as A;
    use ResolveEvent as E;
    use ResolveState as S;

    match (state, event) {
        // --- Load ---
        (S::Load { force_interactive }, E::CacheLoaded) => {
            (S::Validate { force_interactive }, A::CheckExpiry)
        }
        (S::Load { force_interactive }, E::CacheMissing) => (
            S::Acquire {
                interactive: force_interactive,
            },
            A::Acquire {
                interactive: force_interactive,
            },
        ),

        // --- Validate ---
        (S::Validate { .. }, E::CacheValid) => (S::Done, A::ReturnCached),
        (S::Validate { force_interactive }, E::CacheExpired) => (
            S::Acquire {
                interactive: force_interactive,
            },
            A::Acquire {
                interactive: force_interactive,
            },
        ),

        // --- Acquire ---
        (S::Acquire { .. }, E::Acquired) => (S::Persist, A::PersistFresh),
        // Escalation: a failed silent attempt gets exactly one interactive retry
        (S::Acquire { interactive: false }, E::AcquireFailed) => (
            S::Acquire { interactive: true },
            A::Acquire { interactive: true },
        ),
        (S::Acquire { interactive: true }, E::AcquireFailed) => (S::Failed, A::Fail),

        // --- Persist ---
        (S::Persist, E::Persisted | E::PersistFailed) => (S::Done, A::ReturnFresh),

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, A::None),
    }
}

/// Session behaviour knobs.
#[derive(Clone)]
pub struct SessionOptions {
    /// Report cache write failures at `warn` instead of `debug`.
    pub warn_on_save_failure: bool,
    /// Subscriber the session logs to. `None` uses the caller's current
    /// default.
    pub dispatch: Option<Dispatch>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            warn_on_save_failure: true,
            dispatch: None,
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("warn_on_save_failure", &self.warn_on_save_failure)
            .field("dispatch", &self.dispatch.is_some())
            .finish()
    }
}

/// Resolves a valid token for an origin, reusing the cache when possible.
///
/// Holds no state of its own between calls; everything durable goes
/// through the [`CredentialStore`].
pub struct AuthSession {
    store: CredentialStore,
    acquisition: Arc<dyn Acquisition>,
    options: SessionOptions,
}

impl AuthSession {
    pub fn new(
        store: CredentialStore,
        acquisition: Arc<dyn Acquisition>,
        options: SessionOptions,
    ) -> Self {
        Self {
            store,
            acquisition,
            options,
        }
    }

    /// Return a valid token for `origin`.
    ///
    /// Fails only when acquisition failed after escalation. Cache read and
    /// write failures are logged and absorbed.
    pub async fn resolve(&self, origin: &Origin, force_interactive: bool) -> Result<Token> {
        let run = self.run(origin, force_interactive);
        match &self.options.dispatch {
            Some(dispatch) => run.with_subscriber(dispatch.clone()).await,
            None => run.await,
        }
    }

    async fn run(&self, origin: &Origin, force_interactive: bool) -> Result<Token> {
        let (mut state, mut action) = ResolveState::start(force_interactive);
        let mut cached: Option<CachedCredential> = None;
        let mut fresh: Option<CachedCredential> = None;
        let mut last_error: Option<Error> = None;

        loop {
            debug!(origin = %origin, ?state, ?action, "resolve step");

            let event = match action {
                ResolveAction::LoadCache => match self.store.load(origin).await {
                    Ok(credential) => {
                        cached = Some(credential);
                        ResolveEvent::CacheLoaded
                    }
                    Err(e) => {
                        debug!(origin = %origin, error = %e, "no usable cached credential");
                        ResolveEvent::CacheMissing
                    }
                },

                ResolveAction::CheckExpiry => match &cached {
                    Some(credential) if !credential.token().is_expired_at(unix_now()) => {
                        debug!(
                            origin = %origin,
                            expires_at = credential.token().expires_at(),
                            "cached IAP token still valid"
                        );
                        ResolveEvent::CacheValid
                    }
                    _ => {
                        debug!(origin = %origin, "cached IAP token has expired");
                        ResolveEvent::CacheExpired
                    }
                },

                ResolveAction::Acquire { interactive } => {
                    match self.acquisition.obtain(origin, interactive).await {
                        Ok(credential) => {
                            fresh = Some(credential);
                            ResolveEvent::Acquired
                        }
                        Err(e) => {
                            debug!(origin = %origin, interactive, error = %e, "acquisition failed");
                            last_error = Some(e);
                            ResolveEvent::AcquireFailed
                        }
                    }
                }

                ResolveAction::PersistFresh => {
                    let Some(credential) = fresh.as_ref() else {
                        return Err(unexpected(origin, state, action));
                    };
                    match self.store.save(origin, credential).await {
                        Ok(()) => ResolveEvent::Persisted,
                        Err(e) => {
                            if self.options.warn_on_save_failure {
                                warn!(origin = %origin, error = %e, "could not cache IAP token, continuing with it");
                            } else {
                                debug!(origin = %origin, error = %e, "could not cache IAP token, continuing with it");
                            }
                            ResolveEvent::PersistFailed
                        }
                    }
                }

                ResolveAction::ReturnCached => {
                    return cached
                        .map(CachedCredential::into_token)
                        .ok_or_else(|| unexpected(origin, state, action));
                }

                ResolveAction::ReturnFresh => {
                    return fresh
                        .map(CachedCredential::into_token)
                        .ok_or_else(|| unexpected(origin, state, action));
                }

                ResolveAction::Fail => {
                    return Err(Error::Acquisition {
                        origin: origin.to_string(),
                        reason: last_error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "unknown error".into()),
                    });
                }

                ResolveAction::None => return Err(unexpected(origin, state, action)),
            };

            (state, action) = handle_event(state, event);
        }
    }
}

fn unexpected(origin: &Origin, state: ResolveState, action: ResolveAction) -> Error {
    Error::Acquisition {
        origin: origin.to_string(),
        reason: format!("invalid resolve step {action:?} in state {state:?}"),
    }
}

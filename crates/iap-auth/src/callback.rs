//! Loopback redirect receiver for the browser login
//!
//! Binds an ephemeral port on 127.0.0.1, serves a single `GET /` that
//! receives `?code=...&state=...` from the authorization server, and shuts
//! down once one redirect has been handled.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const SUCCESS_PAGE: &str =
    "<html><body><h3>Authentication complete.</h3><p>You can close this window and return to git.</p></body></html>";

/// Query parameters on the redirect.
#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    result_tx: Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>,
}

/// A bound loopback listener waiting for one authorization redirect.
pub struct LoopbackListener {
    listener: TcpListener,
    redirect_uri: String,
}

impl LoopbackListener {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Io(format!("binding loopback listener: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Io(format!("reading loopback address: {e}")))?;
        Ok(Self {
            listener,
            redirect_uri: format!("http://{addr}"),
        })
    }

    /// `http://127.0.0.1:<port>`, registered as the redirect URI.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Serve until one redirect arrives and return its authorization code.
    ///
    /// A redirect whose `state` differs from `expected_state`, or which
    /// carries an `error`, fails the login.
    pub async fn wait_for_code(self, expected_state: &str) -> Result<String> {
        let (result_tx, result_rx) = oneshot::channel();
        let state = CallbackState {
            expected_state: Arc::from(expected_state),
            result_tx: Arc::new(Mutex::new(Some(result_tx))),
        };
        let app = Router::new()
            .route("/", get(handle_redirect))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let result = result_rx
            .await
            .map_err(|_| Error::Io("loopback listener stopped before the redirect".into()));

        let _ = shutdown_tx.send(());
        // Let the response reach the browser, but don't hang on a
        // connection it keeps open.
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, server).await;

        result?
    }
}

async fn handle_redirect(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let outcome = match params {
        CallbackParams {
            error: Some(error), ..
        } => Err(Error::InvalidCredentials(format!(
            "authorization denied: {error}"
        ))),
        CallbackParams {
            state: Some(received),
            ..
        } if *received != *state.expected_state => Err(Error::InvalidCredentials(
            "authorization redirect carried an unexpected state".into(),
        )),
        CallbackParams {
            code: Some(code),
            state: Some(_),
            ..
        } => Ok(code),
        _ => Err(Error::InvalidCredentials(
            "authorization redirect is missing code or state".into(),
        )),
    };

    let response = match &outcome {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE)).into_response(),
        Err(e) => {
            warn!(error = %e, "rejected authorization redirect");
            (StatusCode::BAD_REQUEST, format!("Authentication failed: {e}")).into_response()
        }
    };

    let sender = state
        .result_tx
        .lock()
        .ok()
        .and_then(|mut slot| slot.take());
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => debug!("ignoring repeated authorization redirect"),
    }

    response
}

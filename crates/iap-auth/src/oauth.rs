//! Google OAuth token endpoint calls
//!
//! Two interactions, both POSTs to the token endpoint:
//! 1. Authorization code exchange after a browser login, which yields the
//!    refresh token.
//! 2. Refresh token exchange with `audience` set to the IAP OAuth client,
//!    which yields an OIDC ID token IAP accepts as a bearer.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{AUTHORIZE_ENDPOINT, TOKEN_ENDPOINT};
use crate::error::{Error, Result};
use crate::secret::Secret;

/// OAuth endpoints. Defaults to Google's; overridable for testing and for
/// private deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize: AUTHORIZE_ENDPOINT.into(),
            token: TOKEN_ENDPOINT.into(),
        }
    }
}

/// The desktop OAuth client the helper logs in with (`iap.helperID` /
/// `iap.helperSecret`).
#[derive(Debug, Clone)]
pub struct HelperClient {
    pub id: String,
    pub secret: Secret,
}

/// Response from the token endpoint.
///
/// Which fields are present depends on the grant: the code exchange returns
/// `refresh_token`, the audience exchange returns `id_token`.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Exchange an authorization code for tokens (browser login completion).
pub async fn exchange_code(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    helper: &HelperClient,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&endpoints.token)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", helper.id.as_str()),
            ("client_secret", helper.secret.expose()),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("code exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Exchange a refresh token for an ID token whose audience is the IAP client.
///
/// 400/401/403 mean the refresh token was revoked, expired or issued to
/// another client, and map to `InvalidCredentials`.
pub async fn id_token_for_audience(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    helper: &HelperClient,
    refresh: &Secret,
    audience: &str,
) -> Result<String> {
    let response = client
        .post(&endpoints.token)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh.expose()),
            ("client_id", helper.id.as_str()),
            ("client_secret", helper.secret.expose()),
            ("audience", audience),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;

    debug!(audience, "exchanged refresh token for id token");
    token
        .id_token
        .ok_or_else(|| Error::TokenExchange("token response carried no id_token".into()))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use axum::Router;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;

    use super::*;

    /// Serve `app` on an ephemeral loopback port and return endpoints
    /// pointing at it.
    pub(crate) async fn serve(app: Router) -> Endpoints {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Endpoints {
            authorize: format!("http://{addr}/auth"),
            token: format!("http://{addr}/token"),
        }
    }

    pub(crate) fn helper() -> HelperClient {
        HelperClient {
            id: "helper.apps.googleusercontent.com".into(),
            secret: Secret::new("helper-secret"),
        }
    }

    async fn token_endpoint(axum::Form(form): axum::Form<HashMap<String, String>>) -> Response {
        match form.get("grant_type").map(String::as_str) {
            Some("authorization_code") if form.get("code_verifier").is_some() => {
                axum::Json(serde_json::json!({
                    "access_token": "ya29.access",
                    "refresh_token": format!("1//rt_for_{}", form["code"]),
                    "expires_in": 3599,
                }))
                .into_response()
            }
            Some("refresh_token") if form["refresh_token"] == "1//good" => {
                axum::Json(serde_json::json!({
                    "access_token": "ya29.access",
                    "id_token": format!("id_token_for_{}", form["audience"]),
                    "expires_in": 3599,
                }))
                .into_response()
            }
            Some("refresh_token") if form["refresh_token"] == "1//no-id" => {
                axum::Json(serde_json::json!({ "access_token": "ya29.access" })).into_response()
            }
            Some("refresh_token") if form["refresh_token"] == "1//flaky" => {
                (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response()
            }
            _ => (
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant","error_description":"Bad Request"}"#,
            )
                .into_response(),
        }
    }

    #[test]
    fn token_response_deserializes_partial_bodies() {
        let json = r#"{"access_token":"ya29.a","id_token":"eyJ.x.y","expires_in":3599}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.id_token.as_deref(), Some("eyJ.x.y"));
        assert!(token.refresh_token.is_none());
        assert_eq!(token.expires_in, Some(3599));
    }

    #[test]
    fn default_endpoints_are_google() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.token, "https://oauth2.googleapis.com/token");
        assert_eq!(
            endpoints.authorize,
            "https://accounts.google.com/o/oauth2/v2/auth"
        );
    }

    #[tokio::test]
    async fn exchange_code_returns_refresh_token() {
        let endpoints = serve(Router::new().route("/token", post(token_endpoint))).await;
        let token = exchange_code(
            &reqwest::Client::new(),
            &endpoints,
            &helper(),
            "code-1",
            "verifier",
            "http://127.0.0.1:1",
        )
        .await
        .unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("1//rt_for_code-1"));
    }

    #[tokio::test]
    async fn id_token_exchange_sends_audience() {
        let endpoints = serve(Router::new().route("/token", post(token_endpoint))).await;
        let id_token = id_token_for_audience(
            &reqwest::Client::new(),
            &endpoints,
            &helper(),
            &Secret::new("1//good"),
            "iap-client",
        )
        .await
        .unwrap();
        assert_eq!(id_token, "id_token_for_iap-client");
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_invalid_credentials() {
        let endpoints = serve(Router::new().route("/token", post(token_endpoint))).await;
        let err = id_token_for_audience(
            &reqwest::Client::new(),
            &endpoints,
            &helper(),
            &Secret::new("1//revoked"),
            "iap-client",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn server_error_is_token_exchange() {
        let endpoints = serve(Router::new().route("/token", post(token_endpoint))).await;
        let err = id_token_for_audience(
            &reqwest::Client::new(),
            &endpoints,
            &helper(),
            &Secret::new("1//flaky"),
            "iap-client",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn response_without_id_token_is_an_error() {
        let endpoints = serve(Router::new().route("/token", post(token_endpoint))).await;
        let err = id_token_for_audience(
            &reqwest::Client::new(),
            &endpoints,
            &helper(),
            &Secret::new("1//no-id"),
            "iap-client",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("no id_token"), "got {err}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let endpoints = Endpoints {
            authorize: "http://127.0.0.1:9/auth".into(),
            token: "http://127.0.0.1:9/token".into(),
        };
        let err = id_token_for_audience(
            &reqwest::Client::new(),
            &endpoints,
            &helper(),
            &Secret::new("1//good"),
            "iap-client",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got {err:?}");
    }
}

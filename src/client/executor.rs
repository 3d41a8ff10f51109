use oauth2::AccessToken;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::coordinator::AuthCoordinator;
use super::shared::join_endpoint;
use crate::browser::{BrowserLauncher, SystemBrowser};
use crate::interactive::run_interactive_flow;
use crate::{ApiError, AuthError, ClientConfig, Credentials, Result, TokenState};

/// Agiloft REST client with automatic session management.
///
/// Cheap to share: wrap it in an [`Arc`] and call it from as many tasks as
/// needed. Concurrent calls that find the token expiring trigger a single
/// refresh between them.
///
/// # Example
///
/// ```no_run
/// use agiloft_auth::{AgiloftClient, ClientConfig, Credentials};
/// use reqwest::Method;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::builder()
///     .base_url("https://kb.example.com/ewws/alrest/Demo")
///     .kb("Demo")
///     .credentials(&Credentials::legacy("admin", "secret"))
///     .build()?;
/// let client = AgiloftClient::new(config)?;
///
/// let contract = client.execute(Method::GET, "/contract/42", None, &[]).await?;
/// println!("{contract}");
/// # Ok(())
/// # }
/// ```
pub struct AgiloftClient {
    http: reqwest::Client,
    base_url: Url,
    language: String,
    request_timeout: Duration,
    interactive_timeout: Duration,
    coordinator: AuthCoordinator,
    launcher: Arc<dyn BrowserLauncher>,
}

impl AgiloftClient {
    /// Create a client that opens the system browser for interactive login.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_browser_launcher(config, Arc::new(SystemBrowser))
    }

    /// Create a client with a custom [`BrowserLauncher`].
    pub fn with_browser_launcher(
        config: ClientConfig,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| crate::Error::config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            coordinator: AuthCoordinator::new(http.clone(), &config),
            http,
            base_url: config.base_url,
            language: config.language,
            request_timeout: config.request_timeout,
            interactive_timeout: config.interactive_timeout,
            launcher,
        })
    }

    /// The coordinator guarding this client's tokens.
    pub fn coordinator(&self) -> &AuthCoordinator {
        &self.coordinator
    }

    pub fn token_state(&self) -> TokenState {
        self.coordinator.token_state()
    }

    /// Log in now rather than on the first request.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        self.coordinator.ensure_valid().await
    }

    /// Log in through the browser (authorization code mode).
    ///
    /// Opens the authorization URL, waits up to the configured interactive
    /// timeout for the redirect, checks the state and exchanges the code.
    ///
    /// # Errors
    ///
    /// [`AuthError::WrongMode`] for other credential types, plus every error
    /// of [`run_interactive_flow`].
    pub async fn authenticate_with_browser(&self) -> Result<()> {
        let Credentials::AuthorizationCode(credentials) = self.coordinator.credentials() else {
            return Err(AuthError::WrongMode {
                expected: "authorization_code",
                actual: self.coordinator.credentials().mode(),
            }
            .into());
        };

        info!("starting OAuth2 authorization code flow");
        let grant =
            run_interactive_flow(credentials, self.launcher.as_ref(), self.interactive_timeout)
                .await?;
        self.coordinator.complete_authorization(grant).await
    }

    /// Perform one API call with session handling.
    ///
    /// `endpoint` is relative to the base URL. A `lang` query parameter is
    /// added unless `query` already has one. A 401 triggers one refresh or
    /// re-authentication and exactly one retry.
    ///
    /// Returns the decoded JSON body; a 204 yields an empty object.
    ///
    /// # Errors
    ///
    /// - [`AuthError`] if no valid token can be obtained
    /// - [`ApiError::Status`] for any status outside 200/201/202/204 after the retry
    /// - [`ApiError::Transport`] for connection failures and timeouts
    pub async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<Value> {
        self.coordinator.ensure_valid().await?;

        let url = join_endpoint(&self.base_url, endpoint).map_err(|source| {
            ApiError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                source,
            }
        })?;
        let query = self.with_language(query);

        let snapshot = self
            .coordinator
            .access_token()
            .ok_or(AuthError::NotAuthenticated)?;

        debug!(%method, %url, "sending request");
        let mut response = self.send(&method, &url, &snapshot, body, &query).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(%method, %url, "received 401, attempting token refresh");
            self.coordinator.handle_unauthorized(Some(&snapshot)).await?;

            let token = self
                .coordinator
                .access_token()
                .ok_or(AuthError::NotAuthenticated)?;
            response = self.send(&method, &url, &token, body, &query).await?;
        }

        read_json(&method, &url, response).await
    }

    /// Invalidate the session on the server and forget all tokens.
    ///
    /// The server call is best effort; local state is cleared regardless.
    pub async fn logout(&self) {
        if let Some(token) = self.coordinator.access_token() {
            match self.logout_request(&token).await {
                Ok(()) => info!("logged out successfully"),
                Err(e) => warn!(error = %e, "logout failed"),
            }
        }
        self.coordinator.clear().await;
    }

    async fn logout_request(&self, token: &AccessToken) -> Result<()> {
        let url = join_endpoint(&self.base_url, "logout").map_err(|source| {
            ApiError::InvalidEndpoint {
                endpoint: "logout".to_string(),
                source,
            }
        })?;
        let query = self.with_language(&[]);
        let response = self
            .send(&Method::POST, &url, token, None, &query)
            .await?;
        read_json(&Method::POST, &url, response).await.map(drop)
    }

    async fn send(
        &self,
        method: &Method,
        url: &Url,
        token: &AccessToken,
        body: Option<&Value>,
        query: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(token.secret())
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .query(query)
            .timeout(self.request_timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|source| {
            error!(%method, %url, error = %source, "HTTP client error");
            ApiError::Transport {
                method: method.to_string(),
                url: url.to_string(),
                source,
            }
            .into()
        })
    }

    fn with_language(&self, query: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if !params.iter().any(|(k, _)| k == "lang") {
            params.push(("lang".to_string(), self.language.clone()));
        }
        params
    }
}

/// Map a final response onto the success envelope or an [`ApiError`].
async fn read_json(method: &Method, url: &Url, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await.map_err(|source| ApiError::Transport {
        method: method.to_string(),
        url: url.to_string(),
        source,
    })?;

    match status.as_u16() {
        204 => Ok(Value::Object(Default::default())),
        200 | 201 | 202 => serde_json::from_str(&text).map_err(|source| {
            ApiError::InvalidBody {
                method: method.to_string(),
                url: url.to_string(),
                source,
            }
            .into()
        }),
        code => {
            error!(%method, %url, status = code, "API request failed");
            Err(ApiError::Status {
                method: method.to_string(),
                url: url.to_string(),
                status: code,
                body: text,
            }
            .into())
        }
    }
}

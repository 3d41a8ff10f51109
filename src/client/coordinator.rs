use oauth2::AccessToken;
use serde_json::json;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};
use url::Url;

use super::shared::*;
use crate::credentials::{ClientCredentials, Credentials, LegacyCredentials};
use crate::interactive::AuthorizationGrant;
use crate::types::{IssuedTokens, LoginEnvelope, TokenState};
use crate::{AuthError, ClientConfig, Result};

/// Owner of the session's [`TokenState`].
///
/// Every login, refresh and code exchange runs behind a single async gate,
/// so at most one of them is in flight at a time. Request paths read the
/// token through [`access_token`](Self::access_token) without taking the gate
/// and report stale tokens back through
/// [`handle_unauthorized`](Self::handle_unauthorized).
#[derive(Debug)]
pub struct AuthCoordinator {
    http: reqwest::Client,
    base_url: Url,
    kb: String,
    language: String,
    credentials: Credentials,
    gate: Mutex<()>,
    state: RwLock<TokenState>,
}

/// Proof that the caller holds the gate.
type Gate<'a> = MutexGuard<'a, ()>;

impl AuthCoordinator {
    pub fn new(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            kb: config.kb.clone(),
            language: config.language.clone(),
            credentials: config.credentials.clone(),
            gate: Mutex::new(()),
            state: RwLock::new(TokenState::default()),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Current access token, read without waiting for the gate.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.read_state().access_token().cloned()
    }

    /// Copy of the whole token state.
    pub fn token_state(&self) -> TokenState {
        self.read_state().clone()
    }

    /// Make sure a token with at least a minute of validity is held.
    ///
    /// Refreshes when a refresh token is available and falls back to a full
    /// authentication when refresh is unavailable or fails. Authorization
    /// code sessions never open a browser from here.
    ///
    /// # Errors
    ///
    /// [`AuthError::InteractiveAuthRequired`] for an authorization code
    /// session with nothing left to refresh; any other [`AuthError`] from the
    /// provider.
    pub async fn ensure_valid(&self) -> Result<()> {
        let gate = self.gate.lock().await;
        if !self.read_state().needs_renewal() {
            return Ok(());
        }
        self.renew(&gate).await
    }

    /// Recover from a 401 that was received while sending `snapshot`.
    ///
    /// If the live token already differs from `snapshot`, a concurrent caller
    /// has renewed it and no network call is made.
    pub async fn handle_unauthorized(&self, snapshot: Option<&AccessToken>) -> Result<()> {
        let gate = self.gate.lock().await;
        if !self.read_state().holds_access_token(snapshot) {
            info!("token already refreshed by concurrent request");
            return Ok(());
        }
        self.renew(&gate).await
    }

    /// Authenticate from scratch with the configured credentials.
    pub async fn authenticate(&self) -> Result<()> {
        let gate = self.gate.lock().await;
        self.authenticate_locked(&gate).await
    }

    /// Exchange the held refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// [`AuthError::NoRefreshToken`] if none is held.
    pub async fn refresh(&self) -> Result<()> {
        let gate = self.gate.lock().await;
        self.refresh_locked(&gate).await
    }

    /// Exchange an authorization code from a browser login for tokens.
    pub async fn complete_authorization(&self, grant: AuthorizationGrant) -> Result<()> {
        let gate = self.gate.lock().await;
        self.exchange_code_locked(&gate, grant).await
    }

    /// Forget all tokens and the learned API endpoint.
    pub async fn clear(&self) {
        let _gate = self.gate.lock().await;
        *self.write_state() = TokenState::default();
    }

    /// Refresh, else authenticate. A refresh token that failed once is
    /// dropped before falling back so it is never tried again.
    async fn renew(&self, gate: &Gate<'_>) -> Result<()> {
        if self.read_state().refresh_token().is_some() {
            match self.refresh_locked(gate).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(mode = self.credentials.mode(), error = %e, "token refresh failed, falling back to authentication");
                    self.write_state().discard_refresh_token();
                }
            }
        }

        let result = self.authenticate_locked(gate).await;
        if result.is_err() {
            self.write_state().invalidate_session();
        }
        result
    }

    async fn authenticate_locked(&self, _gate: &Gate<'_>) -> Result<()> {
        let issued = match &self.credentials {
            Credentials::Legacy(c) => self.login_legacy(c).await?,
            Credentials::ClientCredentials(c) => self.login_client_credentials(c).await?,
            Credentials::AuthorizationCode(_) => {
                return Err(AuthError::InteractiveAuthRequired.into());
            }
        };

        let mut state = self.write_state();
        let api_endpoint_override = state.api_endpoint_override().cloned();
        *state = TokenState::new(issued.session, issued.refresh_token, api_endpoint_override);
        Ok(())
    }

    async fn login_legacy(&self, credentials: &LegacyCredentials) -> Result<IssuedTokens> {
        let endpoint = join_endpoint(&self.base_url, "login")
            .map_err(|e| AuthError::InvalidUrl(format!("login endpoint: {e}")))?;
        info!(endpoint = %endpoint, kb = %self.kb, "authenticating (legacy method)");

        let body = json!({
            "password": credentials.password.secret(),
            "KB": self.kb,
            "login": credentials.username.as_str(),
            "lang": self.language,
        });

        let response = self
            .http
            .post(endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|source| AuthError::Transport {
                mode: "legacy",
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| AuthError::Transport {
            mode: "legacy",
            endpoint: endpoint.to_string(),
            source,
        })?;

        if status != reqwest::StatusCode::OK {
            error!(endpoint = %endpoint, username = credentials.username.as_str(), kb = %self.kb, status = status.as_u16(), "authentication failed");
            return Err(AuthError::Rejected {
                mode: "legacy",
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        let envelope: LoginEnvelope =
            serde_json::from_str(&text).map_err(|e| malformed(&endpoint, e))?;
        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "Unknown error".to_string());
            error!(username = credentials.username.as_str(), kb = %self.kb, %message, "authentication failed");
            return Err(AuthError::LoginFailed(message).into());
        }

        let issued = envelope
            .result
            .ok_or_else(|| AuthError::MalformedResponse {
                endpoint: endpoint.to_string(),
                reason: "no result in login response".to_string(),
            })?
            .into_issued(endpoint.as_str())?;
        info!(expires_at = ?issued.session.expires_at, "authentication successful");
        Ok(issued)
    }

    async fn login_client_credentials(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<IssuedTokens> {
        let endpoint = &credentials.token_endpoint;
        info!(endpoint = %endpoint, client_id = credentials.client_id.as_str(), "authenticating (OAuth2 client credentials)");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.secret().as_str()),
            ("kb", self.kb.as_str()),
        ];
        let issued = post_token_form(&self.http, endpoint, &form, "client_credentials")
            .await?
            .into_issued(endpoint.as_str())?;
        info!(expires_at = ?issued.session.expires_at, "OAuth2 authentication successful");
        Ok(issued)
    }

    async fn refresh_locked(&self, _gate: &Gate<'_>) -> Result<()> {
        let (refresh_token, api_endpoint_override) = {
            let state = self.read_state();
            let refresh_token = state
                .refresh_token()
                .cloned()
                .ok_or(AuthError::NoRefreshToken)?;
            (refresh_token, state.api_endpoint_override().cloned())
        };

        let endpoint = self.refresh_endpoint(api_endpoint_override.as_ref())?;
        info!(endpoint = %endpoint, mode = self.credentials.mode(), "refreshing access token");

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.secret().as_str()),
        ];
        self.push_client_fields(&mut form);

        let issued = post_token_form(&self.http, &endpoint, &form, self.credentials.mode())
            .await?
            .into_issued(endpoint.as_str())?;

        // A rotated refresh token replaces the old one; otherwise the old one stays valid.
        let rotated = issued.refresh_token.is_some();
        let next_refresh = issued.refresh_token.or(Some(refresh_token));
        *self.write_state() = TokenState::new(issued.session, next_refresh, api_endpoint_override);

        info!(rotated, "token refresh successful");
        Ok(())
    }

    async fn exchange_code_locked(
        &self,
        _gate: &Gate<'_>,
        grant: AuthorizationGrant,
    ) -> Result<()> {
        let Credentials::AuthorizationCode(credentials) = &self.credentials else {
            return Err(AuthError::WrongMode {
                expected: "authorization_code",
                actual: self.credentials.mode(),
            }
            .into());
        };

        let endpoint = match (&grant.api_access_point, &credentials.token_endpoint) {
            (Some(access_point), _) => token_endpoint_at(access_point)?,
            (None, Some(configured)) => configured.clone(),
            (None, None) => derive_token_endpoint(&self.base_url)?,
        };
        info!(endpoint = %endpoint, "exchanging authorization code for access token");

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", grant.code.secret().as_str()),
        ];
        self.push_client_fields(&mut form);

        let issued = post_token_form(&self.http, &endpoint, &form, "authorization_code")
            .await?
            .into_issued(endpoint.as_str())?;

        let mut state = self.write_state();
        let api_endpoint_override = grant
            .api_access_point
            .or_else(|| state.api_endpoint_override().cloned());
        *state = TokenState::new(issued.session, issued.refresh_token, api_endpoint_override);
        info!(expires_at = ?state.expires_at(), "token exchange successful");
        Ok(())
    }

    /// Configured endpoint, then the provider's access point, then the
    /// endpoint derived from the base URL.
    fn refresh_endpoint(&self, api_endpoint_override: Option<&Url>) -> Result<Url> {
        if let Some(configured) = self.credentials.configured_token_endpoint() {
            return Ok(configured.clone());
        }
        match api_endpoint_override {
            Some(access_point) => token_endpoint_at(access_point),
            None => derive_token_endpoint(&self.base_url),
        }
    }

    fn push_client_fields<'a>(&'a self, form: &mut Vec<(&'a str, &'a str)>) {
        if let Some((client_id, client_secret)) = self.credentials.oauth_client() {
            form.push(("client_id", client_id.as_str()));
            if let Some(secret) = client_secret {
                form.push(("client_secret", secret.secret().as_str()));
            }
        }
        if let Some(redirect_uri) = self.credentials.redirect_uri() {
            form.push(("redirect_uri", redirect_uri.as_str()));
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, TokenState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, TokenState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

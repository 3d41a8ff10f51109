//! Browser-based authorization code handshake.
//!
//! Binds the callback listener, opens the authorization URL, waits for the
//! redirect and checks the CSRF state. The token exchange itself belongs to
//! [`AuthCoordinator`](crate::AuthCoordinator).

use oauth2::{AuthorizationCode, CsrfToken};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::BrowserLauncher;
use crate::credentials::AuthorizationCodeCredentials;
use crate::server::CallbackListener;
use crate::{AuthError, Result};

/// Authorization request sent to the provider.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// The URL the user should visit to log in
    pub authorization_url: Url,
    /// The state token for CSRF protection
    pub state: CsrfToken,
}

/// Result of a completed browser login.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub code: AuthorizationCode,
    /// API access point reported by the provider, if any
    pub api_access_point: Option<Url>,
}

/// Build the authorization URL with a fresh state nonce.
pub fn build_authorization_request(
    credentials: &AuthorizationCodeCredentials,
) -> AuthorizationRequest {
    let state = CsrfToken::new(generate_random_state());

    let mut url = credentials.authorization_endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", credentials.client_id.as_str())
            .append_pair("redirect_uri", credentials.redirect_uri.as_str())
            .append_pair("response_type", "code")
            .append_pair("state", state.secret());
        if let Some(scope) = &credentials.scope {
            query.append_pair("scope", scope);
        }
    }

    AuthorizationRequest {
        authorization_url: url,
        state,
    }
}

/// Run the browser login end to end and return the authorization code.
///
/// # Errors
///
/// - [`AuthError::AuthorizationTimeout`] if no callback arrives within `timeout`
/// - [`AuthError::StateMismatch`] if the returned state is not the one sent
/// - [`AuthError::AuthorizationDenied`] if the provider reports an error
/// - [`AuthError::MissingAuthorizationCode`] if the callback has no code
///
/// The callback listener is shut down before any of these is returned.
pub async fn run_interactive_flow(
    credentials: &AuthorizationCodeCredentials,
    launcher: &dyn BrowserLauncher,
    timeout: Duration,
) -> Result<AuthorizationGrant> {
    let request = build_authorization_request(credentials);
    let listener = CallbackListener::bind(&credentials.redirect_uri).await?;

    info!("opening browser for authorization");
    debug!(url = %request.authorization_url, "authorization URL");
    if let Err(e) = launcher.launch(request.authorization_url.as_str()) {
        warn!(error = %e, "could not open browser; enable debug logging to see the authorization URL");
    }

    let callback = listener.wait(timeout).await?;

    if callback.state.as_deref() != Some(request.state.secret().as_str()) {
        warn!("state mismatch on authorization callback");
        return Err(AuthError::StateMismatch.into());
    }
    if let Some(error) = callback.error {
        warn!(%error, "authorization error reported by provider");
        return Err(AuthError::AuthorizationDenied(error).into());
    }
    let code = callback
        .code
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::MissingAuthorizationCode)?;

    let api_access_point = match callback.api_access_point.filter(|s| !s.is_empty()) {
        Some(hint) => Some(
            Url::parse(&hint)
                .map_err(|e| AuthError::InvalidUrl(format!("api_access_point '{hint}': {e}")))?,
        ),
        None => None,
    };

    info!(
        has_api_access_point = api_access_point.is_some(),
        "authorization code received"
    );
    Ok(AuthorizationGrant {
        code: AuthorizationCode::new(code),
        api_access_point,
    })
}

/// Generate a cryptographically random state token for CSRF protection
///
/// 32 random bytes, base64url encoded.
fn generate_random_state() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    base64::Engine::encode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        &random_bytes,
    )
}

use oauth2::{AccessToken, RefreshToken};
use serde::Deserialize;
use std::time::{Duration, SystemTime};
use url::Url;

use crate::AuthError;

/// Lifetime assumed when the provider omits `expires_in` (15 minutes).
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(900);

/// Tokens with less validity than this left are renewed before use.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// An access token together with the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: AccessToken,
    pub expires_at: SystemTime,
}

/// In-memory authentication state of one client.
///
/// The access token and its expiry live together in [`Session`], so a token
/// without an expiry cannot be represented.
#[derive(Debug, Clone, Default)]
pub struct TokenState {
    session: Option<Session>,
    refresh_token: Option<RefreshToken>,
    api_endpoint_override: Option<Url>,
}

impl TokenState {
    pub(crate) fn new(
        session: Session,
        refresh_token: Option<RefreshToken>,
        api_endpoint_override: Option<Url>,
    ) -> Self {
        Self {
            session: Some(session),
            refresh_token,
            api_endpoint_override,
        }
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.session.as_ref().map(|s| &s.access_token)
    }

    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.session.as_ref().map(|s| s.expires_at)
    }

    /// API access point reported by the provider during authorization code login.
    pub fn api_endpoint_override(&self) -> Option<&Url> {
        self.api_endpoint_override.as_ref()
    }

    /// Whether the held access token is missing or inside the safety margin.
    pub fn needs_renewal(&self) -> bool {
        self.needs_renewal_at(SystemTime::now())
    }

    /// Same as [`needs_renewal`](Self::needs_renewal) evaluated at `now`.
    ///
    /// A token is renewed once strictly less than [`SAFETY_MARGIN`] of
    /// validity remains.
    pub fn needs_renewal_at(&self, now: SystemTime) -> bool {
        match &self.session {
            None => true,
            Some(session) => match session.expires_at.duration_since(now) {
                Ok(remaining) => remaining < SAFETY_MARGIN,
                Err(_) => true,
            },
        }
    }

    /// Whether the live access token still equals `snapshot`.
    pub(crate) fn holds_access_token(&self, snapshot: Option<&AccessToken>) -> bool {
        match (self.access_token(), snapshot) {
            (Some(live), Some(seen)) => live.secret() == seen.secret(),
            (None, None) => true,
            _ => false,
        }
    }

    pub(crate) fn discard_refresh_token(&mut self) {
        self.refresh_token = None;
    }

    /// Drop the access token after a failed renewal, keeping what was learned
    /// about the endpoint.
    pub(crate) fn invalidate_session(&mut self) {
        self.session = None;
    }
}

/// OAuth 2.0 token endpoint response.
///
/// Also the shape of the `result` object of the password login envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// Tokens issued by a single successful exchange.
#[derive(Debug)]
pub(crate) struct IssuedTokens {
    pub session: Session,
    pub refresh_token: Option<RefreshToken>,
}

impl TokenResponse {
    /// Convert into issued tokens, stamping the expiry relative to now.
    pub(crate) fn into_issued(self, endpoint: &str) -> Result<IssuedTokens, AuthError> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse {
                endpoint: endpoint.to_string(),
                reason: "no access_token in response".to_string(),
            })?;

        let lifetime = self
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXPIRES_IN);

        let expires_at = SystemTime::now().checked_add(lifetime).ok_or_else(|| {
            AuthError::MalformedResponse {
                endpoint: endpoint.to_string(),
                reason: "expires_in out of range".to_string(),
            }
        })?;

        Ok(IssuedTokens {
            session: Session {
                access_token: AccessToken::new(access_token),
                expires_at,
            },
            refresh_token: self
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(RefreshToken::new),
        })
    }
}

/// Envelope returned by `POST {base}/login`.
#[derive(Debug, Deserialize)]
pub(crate) struct LoginEnvelope {
    #[serde(default)]
    pub success: bool,
    pub message: Option<String>,
    pub result: Option<TokenResponse>,
}

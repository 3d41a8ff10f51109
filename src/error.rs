use std::time::Duration;

/// Failures while obtaining, refreshing or exchanging credentials.
///
/// Messages name the endpoint, mode and status involved. Passwords, client
/// secrets and tokens are never part of a message.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no refresh token available for token refresh")]
    NoRefreshToken,

    #[error("authorization code mode requires interactive login; call authenticate_with_browser() first")]
    InteractiveAuthRequired,

    #[error("no access token held; the session was cleared")]
    NotAuthenticated,

    #[error("operation requires {expected} mode but client is configured for {actual}")]
    WrongMode {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{mode} authentication rejected by {endpoint}: HTTP {status} - {body}")]
    Rejected {
        mode: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("malformed token response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    #[error("expected JSON from {endpoint} but got '{content_type}': {excerpt}")]
    UnexpectedContentType {
        endpoint: String,
        content_type: String,
        excerpt: String,
    },

    #[error("{mode} request to {endpoint} failed: {source}")]
    Transport {
        mode: &'static str,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("state parameter mismatch - possible CSRF attack")]
    StateMismatch,

    #[error("authorization timeout - no callback received within {0:?}")]
    AuthorizationTimeout(Duration),

    #[error("authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    #[error("no authorization code received in callback")]
    MissingAuthorizationCode,

    #[error("callback server error: {0}")]
    CallbackServer(String),

    #[error("failed to open browser: {0}")]
    BrowserLaunch(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Failures of an authenticated resource call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("API request {method} {url} failed: HTTP {status} - {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("HTTP client error for {method} {url}: {source}")]
    Transport {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid JSON body from {method} {url}: {source}")]
    InvalidBody {
        method: String,
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
}

impl ApiError {
    /// HTTP status carried by a [`ApiError::Status`] failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Top-level error for every public operation of the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The authentication failure, if this is one.
    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            Error::Auth(e) => Some(e),
            _ => None,
        }
    }

    /// The API failure, if this is one.
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

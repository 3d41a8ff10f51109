use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::error;
use url::Url;

use crate::types::TokenResponse;
use crate::{AuthError, Error, Result};

/// Path segment that separates the server root from the REST base.
pub(super) const REST_PATH_MARKER: &str = "/ewws/alrest";
/// Token endpoint path relative to the server root or an API access point.
pub(super) const TOKEN_PATH: &str = "/ewws/otoken";

/// Bodies quoted in error messages are cut to this many characters.
const EXCERPT_LEN: usize = 500;

/// Join `path` onto the base URL, keeping the base's own path.
pub(super) fn join_endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined)
}

/// Token endpoint under an API access point reported by the provider.
pub(super) fn token_endpoint_at(api_access_point: &Url) -> Result<Url> {
    Url::parse(&format!(
        "{}{}",
        api_access_point.as_str().trim_end_matches('/'),
        TOKEN_PATH
    ))
    .map_err(|e| AuthError::InvalidUrl(format!("token endpoint under {api_access_point}: {e}")).into())
}

/// Last-resort token endpoint guessed from the REST base URL.
///
/// Everything from the `/ewws/alrest` marker on is replaced by the token
/// path. This only holds for the standard server layout; configure
/// `token_endpoint` explicitly for anything else.
pub(super) fn derive_token_endpoint(base: &Url) -> Result<Url> {
    let root = base
        .as_str()
        .split(REST_PATH_MARKER)
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    Url::parse(&format!("{root}{TOKEN_PATH}"))
        .map_err(|e| AuthError::InvalidUrl(format!("token endpoint derived from {base}: {e}")).into())
}

/// POST a form to an OAuth 2.0 token endpoint and parse the standard response.
///
/// Anything but a JSON success response is an error.
pub(super) async fn post_token_form(
    http: &reqwest::Client,
    endpoint: &Url,
    form: &[(&str, &str)],
    mode: &'static str,
) -> Result<TokenResponse> {
    let response = http
        .post(endpoint.clone())
        .header(ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(|source| AuthError::Transport {
            mode,
            endpoint: endpoint.to_string(),
            source,
        })?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = response.text().await.map_err(|source| AuthError::Transport {
        mode,
        endpoint: endpoint.to_string(),
        source,
    })?;

    if !status.is_success() {
        error!(mode, endpoint = %endpoint, status = status.as_u16(), "token request rejected");
        return Err(AuthError::Rejected {
            mode,
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }

    if !content_type.contains("application/json") {
        error!(mode, endpoint = %endpoint, %content_type, "unexpected content type from token endpoint");
        return Err(AuthError::UnexpectedContentType {
            endpoint: endpoint.to_string(),
            content_type,
            excerpt: excerpt(&body),
        }
        .into());
    }

    serde_json::from_str(&body).map_err(|e| malformed(endpoint, e))
}

pub(super) fn malformed(endpoint: &Url, e: serde_json::Error) -> Error {
    AuthError::MalformedResponse {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn excerpt(body: &str) -> String {
    body.chars().take(EXCERPT_LEN).collect()
}

//! Credential material for the three supported authentication modes.

use oauth2::{ClientId, ClientSecret, ResourceOwnerPassword, ResourceOwnerUsername};
use url::Url;

/// Username and password for `POST {base}/login`.
#[derive(Debug, Clone)]
pub struct LegacyCredentials {
    pub username: ResourceOwnerUsername,
    pub password: ResourceOwnerPassword,
}

/// OAuth 2.0 client credentials grant.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: ClientId,
    pub client_secret: ClientSecret,
    pub token_endpoint: Url,
}

/// OAuth 2.0 authorization code grant (browser login).
#[derive(Debug, Clone)]
pub struct AuthorizationCodeCredentials {
    pub client_id: ClientId,
    pub client_secret: Option<ClientSecret>,
    pub authorization_endpoint: Url,
    /// When absent the endpoint reported by the provider, or one derived
    /// from the base URL, is used.
    pub token_endpoint: Option<Url>,
    pub redirect_uri: Url,
    pub scope: Option<String>,
}

/// How a client authenticates. Fixed at construction.
#[derive(Debug, Clone)]
pub enum Credentials {
    Legacy(LegacyCredentials),
    ClientCredentials(ClientCredentials),
    AuthorizationCode(AuthorizationCodeCredentials),
}

impl Credentials {
    pub fn legacy(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Legacy(LegacyCredentials {
            username: ResourceOwnerUsername::new(username.into()),
            password: ResourceOwnerPassword::new(password.into()),
        })
    }

    pub fn client_credentials(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_endpoint: Url,
    ) -> Self {
        Credentials::ClientCredentials(ClientCredentials {
            client_id: ClientId::new(client_id.into()),
            client_secret: ClientSecret::new(client_secret.into()),
            token_endpoint,
        })
    }

    /// Mode label used in logs and error messages.
    pub fn mode(&self) -> &'static str {
        match self {
            Credentials::Legacy(_) => "legacy",
            Credentials::ClientCredentials(_) => "client_credentials",
            Credentials::AuthorizationCode(_) => "authorization_code",
        }
    }

    /// Token endpoint explicitly configured for this mode, if any.
    pub(crate) fn configured_token_endpoint(&self) -> Option<&Url> {
        match self {
            Credentials::Legacy(_) => None,
            Credentials::ClientCredentials(c) => Some(&c.token_endpoint),
            Credentials::AuthorizationCode(c) => c.token_endpoint.as_ref(),
        }
    }

    /// OAuth client identity sent along with refresh requests.
    pub(crate) fn oauth_client(&self) -> Option<(&ClientId, Option<&ClientSecret>)> {
        match self {
            Credentials::Legacy(_) => None,
            Credentials::ClientCredentials(c) => Some((&c.client_id, Some(&c.client_secret))),
            Credentials::AuthorizationCode(c) => Some((&c.client_id, c.client_secret.as_ref())),
        }
    }

    pub(crate) fn redirect_uri(&self) -> Option<&Url> {
        match self {
            Credentials::AuthorizationCode(c) => Some(&c.redirect_uri),
            _ => None,
        }
    }
}

/// Source of the credentials a client authenticates with.
///
/// Read once when the client is constructed.
pub trait CredentialProvider {
    fn credentials(&self) -> Credentials;
}

impl CredentialProvider for Credentials {
    fn credentials(&self) -> Credentials {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_shows_secrets() {
        let legacy = Credentials::legacy("admin", "hunter2");
        let cc = Credentials::client_credentials(
            "client",
            "s3cret",
            Url::parse("https://kb.example.com/ewws/otoken").unwrap(),
        );
        assert!(!format!("{:?}", legacy).contains("hunter2"));
        assert!(!format!("{:?}", cc).contains("s3cret"));
    }

    #[test]
    fn configured_endpoint_per_mode() {
        let endpoint = Url::parse("https://kb.example.com/ewws/otoken").unwrap();
        let cc = Credentials::client_credentials("c", "s", endpoint.clone());
        assert_eq!(cc.configured_token_endpoint(), Some(&endpoint));
        assert_eq!(cc.mode(), "client_credentials");
        assert!(Credentials::legacy("u", "p").configured_token_endpoint().is_none());
    }
}

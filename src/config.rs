use oauth2::{ClientId, ClientSecret};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::credentials::{AuthorizationCodeCredentials, CredentialProvider, Credentials};
use crate::{Error, Result};

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for [`AgiloftClient`](crate::AgiloftClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base, e.g. `https://host/ewws/alrest/KB`
    pub base_url: Url,
    /// Knowledge base name
    pub kb: String,
    /// Default `lang` query parameter (default: "en")
    pub language: String,
    pub credentials: Credentials,
    /// Per-call transport timeout (default: 30s)
    pub request_timeout: Duration,
    /// Upper bound on the browser login wait (default: 300s)
    pub interactive_timeout: Duration,
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid configuration JSON: {e}")))?;
        file.agiloft.into_config()
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_layers(Some(path.as_ref()), |_| None)
    }

    /// Build a configuration from `AGILOFT_*` environment variables only.
    pub fn from_env() -> Result<Self> {
        Self::load_layers(None, |key| std::env::var(key).ok())
    }

    /// Load `path` if it exists, then apply `AGILOFT_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_layers(Some(path.as_ref()), |key| std::env::var(key).ok())
    }

    /// Layered load with an injectable variable lookup.
    pub fn load_layers(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut raw = RawConfig::default();

        if let Some(path) = path {
            if path.exists() {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::config(format!("cannot read {}: {e}", path.display()))
                })?;
                let file: ConfigFile = serde_json::from_str(&text).map_err(|e| {
                    Error::config(format!("invalid configuration file {}: {e}", path.display()))
                })?;
                raw = file.agiloft;
                info!(path = %path.display(), "loaded configuration file");
            } else {
                info!(path = %path.display(), "configuration file not found, using environment");
            }
        }

        raw.apply_overrides(lookup);
        raw.into_config()
    }
}

impl CredentialProvider for ClientConfig {
    fn credentials(&self) -> Credentials {
        self.credentials.clone()
    }
}

/// Builder for ClientConfig
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    kb: Option<String>,
    language: Option<String>,
    credentials: Option<Credentials>,
    request_timeout: Option<Duration>,
    interactive_timeout: Option<Duration>,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn kb(mut self, kb: impl Into<String>) -> Self {
        self.kb = Some(kb.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Read credentials from any [`CredentialProvider`].
    pub fn credentials(mut self, provider: &impl CredentialProvider) -> Self {
        self.credentials = Some(provider.credentials());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn interactive_timeout(mut self, timeout: Duration) -> Self {
        self.interactive_timeout = Some(timeout);
        self
    }

    /// Build the ClientConfig
    ///
    /// # Errors
    ///
    /// Fails when the base URL, knowledge base or credentials are missing,
    /// or the base URL does not parse.
    pub fn build(self) -> Result<ClientConfig> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::config("missing base_url"))?;
        let base_url = parse_url("base_url", &base_url)?;
        let kb = self
            .kb
            .filter(|kb| !kb.is_empty())
            .ok_or_else(|| Error::config("missing kb"))?;
        let credentials = self
            .credentials
            .ok_or_else(|| Error::config("missing credentials"))?;

        Ok(ClientConfig {
            base_url,
            kb,
            language: self
                .language
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            credentials,
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            interactive_timeout: self
                .interactive_timeout
                .unwrap_or(DEFAULT_INTERACTIVE_TIMEOUT),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    agiloft: RawConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    base_url: Option<String>,
    kb: Option<String>,
    language: Option<String>,
    username: Option<String>,
    password: Option<String>,
    auth_method: Option<String>,
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    oauth2: RawOAuth2,
}

#[derive(Debug, Default, Deserialize)]
struct RawOAuth2 {
    client_id: Option<String>,
    client_secret: Option<String>,
    token_endpoint: Option<String>,
    authorization_endpoint: Option<String>,
    redirect_uri: Option<String>,
    scope: Option<String>,
}

impl RawConfig {
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let slots: [(&str, &mut Option<String>); 12] = [
            ("AGILOFT_BASE_URL", &mut self.base_url),
            ("AGILOFT_KB", &mut self.kb),
            ("AGILOFT_LANGUAGE", &mut self.language),
            ("AGILOFT_USERNAME", &mut self.username),
            ("AGILOFT_PASSWORD", &mut self.password),
            ("AGILOFT_AUTH_METHOD", &mut self.auth_method),
            ("AGILOFT_OAUTH2_CLIENT_ID", &mut self.oauth2.client_id),
            ("AGILOFT_OAUTH2_CLIENT_SECRET", &mut self.oauth2.client_secret),
            ("AGILOFT_OAUTH2_TOKEN_ENDPOINT", &mut self.oauth2.token_endpoint),
            (
                "AGILOFT_OAUTH2_AUTHORIZATION_ENDPOINT",
                &mut self.oauth2.authorization_endpoint,
            ),
            ("AGILOFT_OAUTH2_REDIRECT_URI", &mut self.oauth2.redirect_uri),
            ("AGILOFT_OAUTH2_SCOPE", &mut self.oauth2.scope),
        ];

        for (var, slot) in slots {
            if let Some(value) = lookup(var) {
                debug!(variable = var, "configuration value taken from environment");
                *slot = Some(value);
            }
        }
    }

    fn into_config(self) -> Result<ClientConfig> {
        let method = self.auth_method.as_deref().unwrap_or("legacy");
        let oauth2 = self.oauth2;

        let credentials = match method {
            "legacy" => Credentials::legacy(
                require("username", self.username)?,
                require("password", self.password)?,
            ),
            "oauth2_client_credentials" => {
                let endpoint = require("oauth2.token_endpoint", oauth2.token_endpoint)?;
                Credentials::client_credentials(
                    require("oauth2.client_id", oauth2.client_id)?,
                    require("oauth2.client_secret", oauth2.client_secret)?,
                    parse_url("oauth2.token_endpoint", &endpoint)?,
                )
            }
            "oauth2_authorization_code" => {
                let authorization_endpoint = require(
                    "oauth2.authorization_endpoint",
                    oauth2.authorization_endpoint,
                )?;
                let redirect_uri = oauth2
                    .redirect_uri
                    .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
                Credentials::AuthorizationCode(AuthorizationCodeCredentials {
                    client_id: ClientId::new(require("oauth2.client_id", oauth2.client_id)?),
                    client_secret: oauth2
                        .client_secret
                        .filter(|s| !s.is_empty())
                        .map(ClientSecret::new),
                    authorization_endpoint: parse_url(
                        "oauth2.authorization_endpoint",
                        &authorization_endpoint,
                    )?,
                    token_endpoint: oauth2
                        .token_endpoint
                        .filter(|s| !s.is_empty())
                        .map(|s| parse_url("oauth2.token_endpoint", &s))
                        .transpose()?,
                    redirect_uri: parse_url("oauth2.redirect_uri", &redirect_uri)?,
                    scope: oauth2.scope.filter(|s| !s.is_empty()),
                })
            }
            other => {
                return Err(Error::config(format!("unknown auth_method '{other}'")));
            }
        };

        let mut builder = ClientConfig::builder()
            .base_url(require("base_url", self.base_url)?)
            .kb(require("kb", self.kb)?)
            .credentials(&credentials);
        if let Some(language) = self.language.filter(|l| !l.is_empty()) {
            builder = builder.language(language);
        }
        if let Some(secs) = self.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        builder.build()
    }
}

/// Missing or empty values name the field, never the value.
fn require(field: &str, value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::config(format!("missing required field {field}")))
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::config(format!("{field} is not a valid URL: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const LEGACY_JSON: &str = r#"{
        "agiloft": {
            "base_url": "https://kb.example.com/ewws/alrest/Demo",
            "kb": "Demo",
            "username": "admin",
            "password": "hunter2"
        }
    }"#;

    #[test]
    fn legacy_is_the_default_method() {
        let config = ClientConfig::from_json_str(LEGACY_JSON).unwrap();
        assert_eq!(config.credentials.mode(), "legacy");
        assert_eq!(config.language, "en");
        assert_eq!(config.kb, "Demo");
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.interactive_timeout, DEFAULT_INTERACTIVE_TIMEOUT);
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = std::env::temp_dir().join(format!("agiloft-auth-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, LEGACY_JSON).unwrap();

        let env: HashMap<&str, &str> = [("AGILOFT_LANGUAGE", "de"), ("AGILOFT_KB", "Prod")]
            .into_iter()
            .collect();
        let config =
            ClientConfig::load_layers(Some(&path), |k| env.get(k).map(|v| v.to_string()))
                .unwrap();

        assert_eq!(config.language, "de");
        assert_eq!(config.kb, "Prod");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn authorization_code_from_environment() {
        let env: HashMap<&str, &str> = [
            ("AGILOFT_BASE_URL", "https://kb.example.com/ewws/alrest/Demo"),
            ("AGILOFT_KB", "Demo"),
            ("AGILOFT_AUTH_METHOD", "oauth2_authorization_code"),
            ("AGILOFT_OAUTH2_CLIENT_ID", "client"),
            (
                "AGILOFT_OAUTH2_AUTHORIZATION_ENDPOINT",
                "https://kb.example.com/ewws/oauth/authorize",
            ),
        ]
        .into_iter()
        .collect();
        let config =
            ClientConfig::load_layers(None, |k| env.get(k).map(|v| v.to_string())).unwrap();

        match config.credentials {
            Credentials::AuthorizationCode(c) => {
                assert_eq!(c.redirect_uri.as_str(), DEFAULT_REDIRECT_URI);
                assert!(c.token_endpoint.is_none());
                assert!(c.client_secret.is_none());
            }
            other => panic!("unexpected mode {}", other.mode()),
        }
    }

    #[test]
    fn missing_field_is_named_without_values() {
        let json = r#"{"agiloft": {"base_url": "https://kb.example.com", "kb": "Demo",
                      "auth_method": "oauth2_client_credentials",
                      "oauth2": {"client_id": "c", "client_secret": "topsecret"}}}"#;
        let err = ClientConfig::from_json_str(json).unwrap_err().to_string();
        assert!(err.contains("oauth2.token_endpoint"));
        assert!(!err.contains("topsecret"));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let json = r#"{"agiloft": {"base_url": "https://kb.example.com", "kb": "Demo",
                      "auth_method": "saml"}}"#;
        assert!(ClientConfig::from_json_str(json).is_err());
    }

    #[test]
    fn builder_requires_credentials() {
        let err = ClientConfig::builder()
            .base_url("https://kb.example.com/ewws/alrest/Demo")
            .kb("Demo")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }
}

//! # agiloft-auth
//!
//! Session management for the Agiloft REST API.
//!
//! Agiloft issues bearer tokens that live for about 15 minutes. This crate
//! obtains them, renews them ahead of expiry, retries once on a 401, and keeps
//! concurrent requests from racing each other into duplicate refreshes.
//!
//! ## Features
//!
//! - **Three login modes**: username/password, OAuth 2.0 client credentials,
//!   OAuth 2.0 authorization code through the browser
//! - **Proactive refresh**: tokens with less than a minute left are renewed
//!   before the request goes out
//! - **Reactive refresh**: a 401 triggers one refresh (or full login) and one retry
//! - **Race-safe**: one refresh in flight at a time; callers that lost the race
//!   reuse the winner's token
//! - **Refresh token rotation**: a rotated refresh token is never reused
//! - **Callback server**: local listener for the authorization redirect with
//!   CSRF state verification and a hard timeout
//! - **Browser integration**: auto-open browser for authorization (default)
//!
//! ## Quick Start
//!
//! ```no_run
//! use agiloft_auth::{AgiloftClient, ClientConfig};
//! use reqwest::Method;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // config.json plus AGILOFT_* environment overrides
//! let client = AgiloftClient::new(ClientConfig::load("config.json")?)?;
//!
//! let found = client
//!     .execute(
//!         Method::POST,
//!         "/contract/search",
//!         Some(&json!({"search": "", "field": ["id"], "query": ""})),
//!         &[],
//!     )
//!     .await?;
//! println!("{found}");
//!
//! client.logout().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Browser Login
//!
//! ```no_run
//! use agiloft_auth::{AgiloftClient, ClientConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AgiloftClient::new(ClientConfig::from_env()?)?;
//!
//! // Required once before the first request in authorization code mode
//! client.authenticate_with_browser().await?;
//! # Ok(())
//! # }
//! ```

mod browser;
mod client;
mod config;
mod credentials;
mod error;
mod interactive;
mod server;
mod types;

// Public API exports
pub use browser::{open_browser, BrowserLauncher, SystemBrowser};
pub use client::{AgiloftClient, AuthCoordinator};
pub use config::{
    ClientConfig, ClientConfigBuilder, DEFAULT_INTERACTIVE_TIMEOUT, DEFAULT_LANGUAGE,
    DEFAULT_REDIRECT_URI, DEFAULT_REQUEST_TIMEOUT,
};
pub use credentials::{
    AuthorizationCodeCredentials, ClientCredentials, CredentialProvider, Credentials,
    LegacyCredentials,
};
pub use error::{ApiError, AuthError, Error, Result};
pub use interactive::{
    build_authorization_request, run_interactive_flow, AuthorizationGrant, AuthorizationRequest,
};
pub use server::{CallbackData, CallbackListener, DEFAULT_CALLBACK_PORT};
pub use types::{Session, TokenState, DEFAULT_EXPIRES_IN, SAFETY_MARGIN};

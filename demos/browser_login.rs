//! OAuth2 authorization code login through the browser
//!
//! Requires `AGILOFT_AUTH_METHOD=oauth2_authorization_code` together with the
//! client id, authorization endpoint and redirect URI settings.
//!
//! Run with: cargo run --example browser_login

use agiloft_auth::{AgiloftClient, ClientConfig, Credentials};
use reqwest::Method;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Agiloft API - OAuth2 Authorization Code ===\n");

    let config = ClientConfig::load("config.json")?;
    if !matches!(config.credentials, Credentials::AuthorizationCode(_)) {
        anyhow::bail!(
            "auth method is '{}'; set AGILOFT_AUTH_METHOD=oauth2_authorization_code",
            config.credentials.mode()
        );
    }
    let client = AgiloftClient::new(config)?;

    println!("🌐 Your browser will open for you to log in.");
    println!("After logging in you'll be redirected back here.\n");
    client.authenticate_with_browser().await?;
    println!("✅ Authentication successful!");

    let contract = client
        .execute(Method::GET, "/contract/1", None, &[])
        .await?;
    println!("\nContract 1: {}", serde_json::to_string_pretty(&contract)?);

    client.logout().await;
    Ok(())
}

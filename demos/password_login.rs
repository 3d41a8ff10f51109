//! Username/password or client-credentials login
//!
//! Loads `config.json` (if present) plus `AGILOFT_*` environment variables,
//! logs in, runs one contract search and logs out.
//!
//! Run with: cargo run --example password_login

use agiloft_auth::{AgiloftClient, ClientConfig};
use reqwest::Method;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Agiloft API - Session Login ===\n");

    let config = ClientConfig::load("config.json")?;
    println!("Auth method: {}", config.credentials.mode());
    let client = AgiloftClient::new(config)?;

    client.ensure_authenticated().await?;
    if let Some(expires_at) = client.token_state().expires_at() {
        println!("✅ Logged in, token expires at {:?}", expires_at);
    }

    let found = client
        .execute(
            Method::POST,
            "/contract/search",
            Some(&json!({"search": "", "field": ["id", "contract_title1"], "query": ""})),
            &[],
        )
        .await?;
    let count = found["result"].as_array().map(Vec::len).unwrap_or(0);
    println!("Found {} contracts", count);

    client.logout().await;
    println!("\n👋 Logged out");

    Ok(())
}

use agiloft_auth::{
    AgiloftClient, AuthError, AuthorizationCodeCredentials, BrowserLauncher, ClientConfig,
    Credentials,
};
use oauth2::ClientId;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Stands in for the user's browser: follows the redirect straight back to
/// the callback listener.
enum FakeBrowser {
    Approve { api_access_point: Option<String> },
    ForgeState,
    Deny,
    NoCode,
    DuplicateCode,
    Ignore,
}

impl BrowserLauncher for FakeBrowser {
    fn launch(&self, url: &str) -> agiloft_auth::Result<()> {
        let url = Url::parse(url).unwrap();
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        let mut callback = Url::parse(&param("redirect_uri")).unwrap();
        let state = param("state");

        {
            let mut query = callback.query_pairs_mut();
            match self {
                FakeBrowser::Approve { api_access_point } => {
                    query.append_pair("code", "auth-code-1").append_pair("state", &state);
                    if let Some(hint) = api_access_point {
                        query.append_pair("api_access_point", hint);
                    }
                }
                FakeBrowser::ForgeState => {
                    query
                        .append_pair("code", "auth-code-1")
                        .append_pair("state", "forged");
                }
                FakeBrowser::Deny => {
                    query.append_pair("error", "access_denied").append_pair("state", &state);
                }
                FakeBrowser::NoCode => {
                    query.append_pair("state", &state);
                }
                FakeBrowser::DuplicateCode => {
                    query
                        .append_pair("code", "auth-code-1")
                        .append_pair("code", "auth-code-2")
                        .append_pair("state", &state);
                }
                FakeBrowser::Ignore => return Ok(()),
            }
        }

        tokio::spawn(async move {
            let page = reqwest::get(callback).await.unwrap().text().await.unwrap();
            assert!(page.contains("<html>"));
        });
        Ok(())
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn client(server: &MockServer, port: u16, browser: FakeBrowser) -> AgiloftClient {
    let credentials = Credentials::AuthorizationCode(AuthorizationCodeCredentials {
        client_id: ClientId::new("demo".to_string()),
        client_secret: None,
        authorization_endpoint: Url::parse(&format!("{}/ewws/oauth/authorize", server.uri()))
            .unwrap(),
        token_endpoint: None,
        redirect_uri: Url::parse(&format!("http://127.0.0.1:{port}/callback")).unwrap(),
        scope: None,
    });
    let config = ClientConfig::builder()
        .base_url(format!("{}/ewws/alrest/Demo", server.uri()))
        .kb("Demo")
        .credentials(&credentials)
        .interactive_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    AgiloftClient::with_browser_launcher(config, Arc::new(browser)).unwrap()
}

#[tokio::test]
async fn browser_login_exchanges_code_at_reported_access_point() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ewws/otoken"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("client_id=demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "B1", "refresh_token": "BR1", "expires_in": 900
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ewws/alrest/Demo/contract/7"))
        .and(header("authorization", "Bearer B1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(
        &server,
        free_port(),
        FakeBrowser::Approve {
            api_access_point: Some(server.uri()),
        },
    );
    client.authenticate_with_browser().await.unwrap();

    let state = client.token_state();
    assert_eq!(state.refresh_token().unwrap().secret(), "BR1");
    assert_eq!(
        state.api_endpoint_override().map(|u| u.as_str().trim_end_matches('/')),
        Some(server.uri().as_str())
    );

    let body = client
        .execute(Method::GET, "/contract/7", None, &[])
        .await
        .unwrap();
    assert_eq!(body["id"], 7);
}

#[tokio::test]
async fn forged_state_fails_without_token_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "X"})))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, free_port(), FakeBrowser::ForgeState);
    let err = client.authenticate_with_browser().await.unwrap_err();

    assert!(matches!(err.as_auth(), Some(AuthError::StateMismatch)));
    assert!(client.token_state().access_token().is_none());
}

#[tokio::test]
async fn provider_error_is_reported() {
    let server = MockServer::start().await;

    let client = client(&server, free_port(), FakeBrowser::Deny);
    let err = client.authenticate_with_browser().await.unwrap_err();

    match err.as_auth() {
        Some(AuthError::AuthorizationDenied(reason)) => assert_eq!(reason, "access_denied"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn callback_without_code_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, free_port(), FakeBrowser::NoCode);
    let err = client.authenticate_with_browser().await.unwrap_err();

    assert!(matches!(
        err.as_auth(),
        Some(AuthError::MissingAuthorizationCode)
    ));
    assert!(client.token_state().access_token().is_none());
}

#[tokio::test]
async fn undecodable_callback_fails_without_waiting_for_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, free_port(), FakeBrowser::DuplicateCode);
    let err = tokio::time::timeout(Duration::from_secs(2), client.authenticate_with_browser())
        .await
        .expect("flow must not wait for the interactive timeout")
        .unwrap_err();

    match err.as_auth() {
        Some(AuthError::AuthorizationDenied(reason)) => assert_eq!(reason, "invalid_callback"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn timeout_fails_and_frees_the_port() {
    let server = MockServer::start().await;
    let port = free_port();

    let credentials = Credentials::AuthorizationCode(AuthorizationCodeCredentials {
        client_id: ClientId::new("demo".to_string()),
        client_secret: None,
        authorization_endpoint: Url::parse("https://kb.example.com/ewws/oauth/authorize").unwrap(),
        token_endpoint: None,
        redirect_uri: Url::parse(&format!("http://127.0.0.1:{port}/callback")).unwrap(),
        scope: None,
    });
    let config = ClientConfig::builder()
        .base_url(format!("{}/ewws/alrest/Demo", server.uri()))
        .kb("Demo")
        .credentials(&credentials)
        .interactive_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let client = AgiloftClient::with_browser_launcher(config, Arc::new(FakeBrowser::Ignore)).unwrap();

    let err = client.authenticate_with_browser().await.unwrap_err();
    assert!(matches!(
        err.as_auth(),
        Some(AuthError::AuthorizationTimeout(_))
    ));

    tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("callback port must be released");
}

#[tokio::test]
async fn requests_need_interactive_login_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, free_port(), FakeBrowser::Ignore);
    let err = client
        .execute(Method::GET, "/contract/1", None, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_auth(),
        Some(AuthError::InteractiveAuthRequired)
    ));
}

#[tokio::test]
async fn browser_login_needs_authorization_code_mode() {
    let config = ClientConfig::builder()
        .base_url("https://kb.example.com/ewws/alrest/Demo")
        .kb("Demo")
        .credentials(&Credentials::legacy("admin", "hunter2"))
        .build()
        .unwrap();
    let client = AgiloftClient::with_browser_launcher(config, Arc::new(FakeBrowser::Ignore)).unwrap();

    let err = client.authenticate_with_browser().await.unwrap_err();
    assert!(matches!(err.as_auth(), Some(AuthError::WrongMode { .. })));
}

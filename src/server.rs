use axum::{
    extract::{rejection::QueryRejection, Query, RawQuery, State},
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::{AuthError, Result};

/// Port used when the redirect URI does not name one.
pub const DEFAULT_CALLBACK_PORT: u16 = 8080;

/// How long in-flight callback responses may take to drain on teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Query parameters delivered by the provider's redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackData {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Provider-specific API endpoint hint
    pub api_access_point: Option<String>,
    pub error: Option<String>,
}

struct ServerState {
    tx: Mutex<Option<oneshot::Sender<CallbackData>>>,
}

/// A bound, not yet serving, local endpoint for the authorization redirect.
#[derive(Debug)]
pub struct CallbackListener {
    listener: tokio::net::TcpListener,
    path: String,
    local_addr: SocketAddr,
}

impl CallbackListener {
    /// Bind to the host, port and path of `redirect_uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI has no host or the address cannot be bound.
    pub async fn bind(redirect_uri: &Url) -> Result<Self> {
        let host = match redirect_uri.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(AuthError::InvalidUrl(format!(
                    "redirect URI {redirect_uri} has no host"
                ))
                .into())
            }
        };
        let port = redirect_uri.port().unwrap_or(DEFAULT_CALLBACK_PORT);

        let listener = tokio::net::TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| {
                AuthError::CallbackServer(format!("Failed to bind to {host}:{port}: {e}"))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::CallbackServer(format!("no local address: {e}")))?;

        info!(%local_addr, path = redirect_uri.path(), "callback server started");

        Ok(Self {
            listener,
            path: redirect_uri.path().to_string(),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the first callback arrives or `timeout` elapses.
    ///
    /// The listener is shut down before this returns, whatever the outcome,
    /// and also when the returned future is dropped early. The state is not
    /// checked here.
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthorizationTimeout`] when no callback arrives in time.
    pub async fn wait(self, timeout: Duration) -> Result<CallbackData> {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(ServerState {
            tx: Mutex::new(Some(tx)),
        });
        let app = callback_router(&self.path, state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let local_addr = self.local_addr;
        let mut server = AbortOnDrop(Some(tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        })));

        let outcome = tokio::time::timeout(timeout, rx).await;

        let _ = shutdown_tx.send(());
        server.shutdown().await;
        debug!(%local_addr, "callback server stopped");

        match outcome {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(AuthError::CallbackServer(
                "Server shut down unexpectedly".to_string(),
            )
            .into()),
            Err(_) => Err(AuthError::AuthorizationTimeout(timeout).into()),
        }
    }
}

/// Aborts the server task if the waiting future is dropped.
struct AbortOnDrop(Option<JoinHandle<std::io::Result<()>>>);

impl AbortOnDrop {
    async fn shutdown(&mut self) {
        let Some(mut handle) = self.0.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "callback server failed"),
            Ok(Err(e)) => warn!(error = %e, "callback server task failed"),
            Err(_) => {
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

fn callback_router(path: &str, state: Arc<ServerState>) -> Router {
    Router::new()
        .route(path, get(handle_callback))
        .with_state(state)
}

async fn handle_callback(
    query: Result<Query<CallbackData>, QueryRejection>,
    RawQuery(raw): RawQuery,
    State(state): State<Arc<ServerState>>,
) -> Html<String> {
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            warn!(error = %rejection, "malformed authorization callback");
            invalid_callback(raw.as_deref().unwrap_or_default())
        }
    };
    let page = render_page(&params);

    match state.tx.lock().await.take() {
        Some(tx) => {
            info!(
                has_code = params.code.is_some(),
                has_error = params.error.is_some(),
                "authorization callback received"
            );
            let _ = tx.send(params);
        }
        None => debug!("ignoring repeated authorization callback"),
    }

    Html(page)
}

/// Callback for a query that could not be decoded. The first `state` is kept
/// so the flow can still tell a genuine redirect from a forged one.
fn invalid_callback(raw: &str) -> CallbackData {
    let state = url::form_urlencoded::parse(raw.as_bytes())
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned());
    CallbackData {
        state,
        error: Some("invalid_callback".to_string()),
        ..CallbackData::default()
    }
}

fn render_page(params: &CallbackData) -> String {
    if let Some(error) = &params.error {
        return page(
            "Authorization Failed",
            &format!("<p>Error: {}</p>", escape_html(error)),
        );
    }
    if params.code.is_none() {
        return page(
            "Authorization Failed",
            "<p>No authorization code received.</p>",
        );
    }
    page(
        "Authorization Successful!",
        "<p>You can close this window and return to the application.</p>",
    )
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<html>
    <head><title>{title}</title></head>
    <body>
        <h1>{title}</h1>
        {body}
        <p>You can close this window.</p>
    </body>
</html>"#
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn call(uri: &str) -> (StatusCode, String, Option<CallbackData>) {
        let (tx, mut rx) = oneshot::channel();
        let state = Arc::new(ServerState {
            tx: Mutex::new(Some(tx)),
        });
        let response = callback_router("/callback", state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (
            status,
            String::from_utf8(bytes.to_vec()).unwrap(),
            rx.try_recv().ok(),
        )
    }

    #[tokio::test]
    async fn success_page_and_payload() {
        let (status, body, data) =
            call("/callback?code=abc&state=xyz&api_access_point=https%3A%2F%2Fkb.example.com").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Authorization Successful"));
        let data = data.unwrap();
        assert_eq!(data.code.as_deref(), Some("abc"));
        assert_eq!(data.state.as_deref(), Some("xyz"));
        assert_eq!(data.api_access_point.as_deref(), Some("https://kb.example.com"));
    }

    #[tokio::test]
    async fn provider_error_is_escaped() {
        let (_, body, data) = call("/callback?error=%3Cscript%3E").await;
        assert!(body.contains("Authorization Failed"));
        assert!(body.contains("&lt;script&gt;"));
        assert!(!body.contains("<script>"));
        assert_eq!(data.unwrap().error.as_deref(), Some("<script>"));
    }

    #[tokio::test]
    async fn missing_code_page() {
        let (_, body, data) = call("/callback?state=xyz").await;
        assert!(body.contains("No authorization code received"));
        assert!(data.unwrap().code.is_none());
    }

    #[tokio::test]
    async fn undecodable_query_still_answers_and_delivers() {
        let (status, body, data) = call("/callback?code=a&code=b&state=xyz").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Authorization Failed"));
        let data = data.unwrap();
        assert_eq!(data.error.as_deref(), Some("invalid_callback"));
        assert_eq!(data.state.as_deref(), Some("xyz"));
        assert!(data.code.is_none());
    }

    #[tokio::test]
    async fn other_paths_are_not_routed() {
        let (status, _, data) = call("/favicon.ico").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn timeout_releases_port() {
        let redirect = Url::parse("http://127.0.0.1:0/callback").unwrap();
        let listener = CallbackListener::bind(&redirect).await.unwrap();
        let addr = listener.local_addr();

        let err = listener.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(
            err.as_auth(),
            Some(AuthError::AuthorizationTimeout(_))
        ));

        tokio::net::TcpListener::bind(addr)
            .await
            .expect("port must be free after teardown");
    }
}

use crate::Result;

/// Opens the authorization URL for the user.
///
/// The interactive login calls this once, after the callback listener is
/// bound. Implementations must not block until the login finishes.
pub trait BrowserLauncher: Send + Sync {
    fn launch(&self, url: &str) -> Result<()>;
}

/// Launches the user's default web browser.
///
/// Without the `browser` feature the URL is only logged, for the user to
/// open by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn launch(&self, url: &str) -> Result<()> {
        open_browser(url)
    }
}

/// Open a URL in the user's default web browser
///
/// # Errors
///
/// Returns an error if the browser cannot be launched
///
/// # Example
///
/// ```no_run
/// use agiloft_auth::open_browser;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// open_browser("https://kb.example.com/ewws/oauth/authorize?client_id=demo")?;
/// println!("Browser opened! Please log in.");
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "browser")]
pub fn open_browser(url: &str) -> Result<()> {
    webbrowser::open(url)
        .map_err(|e| crate::AuthError::BrowserLaunch(e.to_string()).into())
}

#[cfg(not(feature = "browser"))]
pub fn open_browser(url: &str) -> Result<()> {
    tracing::info!(url, "open this URL in a browser to log in");
    Ok(())
}

//! Browser session lifecycle: launch, login, disconnect recovery.
//!
//! One [`Session`] owns one Chromium process and the primary tab. The login
//! flow tolerates the site completing a session transition without a
//! conventional navigation event, and a dead CDP connection is repaired with
//! a bounded reconnect instead of killing the process on the first drop.

pub mod driver;
pub mod pacing;
pub mod stealth;

pub use driver::{DriverError, PageDriver};
pub use pacing::Pacing;

use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BrowserSettings, Credentials, RetryConfig, SiteConfig};
use crate::retry::{retry, Backoff};

/// Call-to-action that only renders for anonymous visitors; its absence is
/// the positive login signal.
const LOGIN_CTA: &str = r#"a[href="/ab/account-security/login"]"#;
const IDENTIFIER_INPUT: &str = r#"input[name="login[username]"]"#;
const PASSWORD_INPUT: &str = r#"input[name="login[password]"]"#;
const CONTINUE_BUTTON: &str = "#login_password_continue";
const SUBMIT_BUTTON: &str = "#login_control_continue";
const COOKIE_CONSENT_BUTTON: &str = "#onetrust-accept-btn-handler";

/// Places the login form surfaces a rejection message.
const ERROR_BANNER_SELECTORS: &[&str] = &[
    ".air3-form-message-error",
    r#"div[role="alert"]"#,
];

/// How often the error-banner side of the login race re-polls.
const BANNER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Password step gets its own shorter wait; the form renders it in-page.
const PASSWORD_FIELD_WAIT: Duration = Duration::from_secs(30);

const MAX_RECONNECT_ATTEMPTS: u32 = 3;

const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    LoggingIn,
    LoggedIn,
    Disconnected,
    Reconnecting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::LoggingIn => "logging_in",
            Self::LoggedIn => "logged_in",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("chrome executable not found; install chromium or google-chrome")]
    ChromeNotFound,
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("browser session not initialized")]
    NotInitialized,
    #[error("login credentials not configured")]
    MissingCredentials,
    #[error("login rejected by site: {0}")]
    LoginRejected(String),
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("login retries exhausted after {attempts} attempts: {last}")]
    LoginRetriesExhausted { attempts: u32, last: String },
    #[error("reconnect failed after {attempts} attempts: {last}")]
    ReconnectExhausted { attempts: u32, last: String },
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl SessionError {
    /// Timeout-classified failures warrant a login-status re-check before
    /// burning a retry; the session may have transitioned without an event.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Driver(DriverError::NavigationTimeout { .. }) => true,
            Self::LoginFailed(msg) => msg.contains("timed out"),
            _ => false,
        }
    }

    /// Session-fatal conditions: the authenticated-browser precondition can
    /// no longer be established, so the pipeline must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LoginRetriesExhausted { .. }
                | Self::ReconnectExhausted { .. }
                | Self::ChromeNotFound
                | Self::MissingCredentials
        )
    }
}

/// Everything tied to one launched Chromium process.
struct Connection {
    browser: Arc<Mutex<Browser>>,
    driver: Arc<PageDriver>,
    handler_task: JoinHandle<()>,
    /// Receives one message when the CDP event stream ends.
    disconnected: mpsc::UnboundedReceiver<()>,
}

/// Owns the browser process and primary tab.
pub struct Session {
    settings: BrowserSettings,
    retry_cfg: RetryConfig,
    site: SiteConfig,
    pacing: Pacing,
    state: StdMutex<SessionState>,
    conn: Mutex<Option<Connection>>,
}

impl Session {
    pub fn new(settings: BrowserSettings, retry_cfg: RetryConfig, site: SiteConfig, pacing: Pacing) -> Self {
        Self {
            settings,
            retry_cfg,
            site,
            pacing,
            state: StdMutex::new(SessionState::Uninitialized),
            conn: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard != next {
            debug!(from = guard.as_str(), to = next.as_str(), "session state");
            *guard = next;
        }
    }

    /// Launches Chromium with the evasion flags and opens the primary tab.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.set_state(SessionState::Initializing);

        let chrome_path = find_chrome()?;
        info!("launching browser (headless={})", self.settings.headless);

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(dir) = &self.settings.profile_dir {
            builder = builder.user_data_dir(dir);
        }
        for arg in stealth::CHROME_ARGS {
            builder = builder.arg(*arg);
        }
        let config = builder.build().map_err(SessionError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            let _ = tx.send(());
        });

        let browser = Arc::new(Mutex::new(browser));
        let driver = PageDriver::open(
            browser.clone(),
            self.settings.clone(),
            self.retry_cfg,
            self.pacing.clone(),
        )
        .await?;

        let mut guard = self.conn.lock().await;
        if let Some(old) = guard.take() {
            release_connection(old).await;
        }
        *guard = Some(Connection {
            browser,
            driver: Arc::new(driver),
            handler_task,
            disconnected: rx,
        });
        drop(guard);

        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Primary-tab driver.
    pub async fn driver(&self) -> Result<Arc<PageDriver>, SessionError> {
        self.conn
            .lock()
            .await
            .as_ref()
            .map(|conn| conn.driver.clone())
            .ok_or(SessionError::NotInitialized)
    }

    /// Browser handle for transient secondary tabs.
    pub async fn browser(&self) -> Result<Arc<Mutex<Browser>>, SessionError> {
        self.conn
            .lock()
            .await
            .as_ref()
            .map(|conn| conn.browser.clone())
            .ok_or(SessionError::NotInitialized)
    }

    /// Pure DOM read: the login call-to-action is absent on authenticated
    /// pages. No side effects.
    pub async fn check_login_status(&self) -> bool {
        match self.driver().await {
            Ok(driver) => !driver.exists(LOGIN_CTA).await,
            Err(_) => false,
        }
    }

    /// Full login flow on the primary tab.
    pub async fn login(&self) -> Result<(), SessionError> {
        let credentials = self
            .site
            .credentials
            .clone()
            .ok_or(SessionError::MissingCredentials)?;
        let driver = self.driver().await?;

        self.set_state(SessionState::LoggingIn);
        let result = self.login_inner(&driver, &credentials).await;
        match &result {
            Ok(()) => {
                info!("login successful");
                self.set_state(SessionState::LoggedIn);
            }
            Err(err) => {
                warn!("login failed: {}", err);
                self.set_state(SessionState::Ready);
            }
        }
        result
    }

    async fn login_inner(
        &self,
        driver: &PageDriver,
        credentials: &Credentials,
    ) -> Result<(), SessionError> {
        driver.clear_cookies().await?;
        driver.navigate(self.site.login_url.as_str()).await?;
        self.pacing.challenge_settle().await;
        self.dismiss_cookie_banner(driver).await;

        info!("entering login identifier");
        if !driver.wait_for(IDENTIFIER_INPUT, driver.default_timeout()).await {
            return Err(SessionError::LoginFailed(
                "identifier field never appeared".into(),
            ));
        }
        driver.type_into(IDENTIFIER_INPUT, &credentials.user).await?;
        self.pacing.challenge_settle().await;

        if !driver.click(CONTINUE_BUTTON).await {
            return Err(SessionError::LoginFailed("continue button not clickable".into()));
        }

        info!("entering login secret");
        if !driver.wait_for(PASSWORD_INPUT, PASSWORD_FIELD_WAIT).await {
            return Err(SessionError::LoginFailed("password field never appeared".into()));
        }
        driver.type_into(PASSWORD_INPUT, &credentials.secret).await?;
        self.pacing.challenge_settle().await;

        if !driver.click(SUBMIT_BUTTON).await {
            return Err(SessionError::LoginFailed("submit button not clickable".into()));
        }

        self.await_login_outcome(driver).await
    }

    /// Races navigation-settled against a rejection banner. The site can
    /// finish the session transition without firing a navigation event, so
    /// a timeout falls back to the DOM login-status check.
    async fn await_login_outcome(&self, driver: &PageDriver) -> Result<(), SessionError> {
        let page = driver.page().await;

        let banner = async {
            loop {
                for selector in ERROR_BANNER_SELECTORS {
                    if driver.is_visible(selector).await {
                        let text = driver
                            .evaluate::<String>(&format!(
                                "document.querySelector('{}')?.innerText || ''",
                                selector
                            ))
                            .await
                            .unwrap_or_default();
                        let text = text.trim();
                        if !text.is_empty() {
                            return text.to_string();
                        }
                    }
                }
                tokio::time::sleep(BANNER_POLL_INTERVAL).await;
            }
        };

        tokio::select! {
            nav = tokio::time::timeout(self.settings.nav_timeout, page.wait_for_navigation()) => {
                match nav {
                    Ok(_) => {
                        self.pacing.challenge_settle().await;
                        if self.check_login_status().await {
                            Ok(())
                        } else {
                            Err(SessionError::LoginFailed("still on login page".into()))
                        }
                    }
                    Err(_) => {
                        warn!("login navigation timed out, falling back to status check");
                        if self.check_login_status().await {
                            Ok(())
                        } else {
                            Err(SessionError::LoginFailed("login verification timed out".into()))
                        }
                    }
                }
            }
            text = banner => Err(SessionError::LoginRejected(text)),
        }
    }

    /// Consent banners intercept clicks when present; dismissal is best-effort.
    async fn dismiss_cookie_banner(&self, driver: &PageDriver) {
        if driver.exists(COOKIE_CONSENT_BUTTON).await {
            debug!("dismissing cookie consent banner");
            let _ = driver.click(COOKIE_CONSENT_BUTTON).await;
        }
    }

    /// Login with the shared retry budget. A rejection banner is terminal;
    /// a timeout re-checks the session before the attempt is counted against
    /// an already-successful login.
    pub async fn login_with_retry(&self) -> Result<(), SessionError> {
        let max_attempts = self.retry_cfg.max_attempts;
        let result = retry(
            "login",
            max_attempts,
            Backoff::Linear(self.retry_cfg.base_delay),
            |err: &SessionError| {
                matches!(err, SessionError::LoginRejected(_) | SessionError::MissingCredentials)
            },
            |attempt| async move {
                match self.login().await {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_timeout() => {
                        info!("login attempt {} hit a timeout, re-checking session", attempt);
                        if self.check_login_status().await {
                            self.set_state(SessionState::LoggedIn);
                            Ok(())
                        } else {
                            Err(err)
                        }
                    }
                    Err(err) => Err(err),
                }
            },
        )
        .await;

        result.map_err(|err| match err {
            SessionError::LoginRejected(_) | SessionError::MissingCredentials => err,
            other => SessionError::LoginRetriesExhausted {
                attempts: max_attempts,
                last: other.to_string(),
            },
        })
    }

    /// True once the handler task has observed the event stream ending.
    pub async fn is_disconnected(&self) -> bool {
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            None => false,
            Some(conn) => match conn.disconnected.try_recv() {
                Ok(()) => true,
                Err(mpsc::error::TryRecvError::Disconnected) => true,
                Err(mpsc::error::TryRecvError::Empty) => false,
            },
        }
    }

    /// Repairs a dropped CDP connection before the next cycle touches the
    /// browser. A healthy session returns immediately.
    pub async fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.conn.lock().await.is_none() {
            return Ok(());
        }
        if !self.is_disconnected().await {
            return Ok(());
        }

        warn!("browser disconnected, attempting to reestablish the session");
        self.set_state(SessionState::Disconnected);
        self.reconnect().await
    }

    async fn reconnect(&self) -> Result<(), SessionError> {
        self.set_state(SessionState::Reconnecting);
        let result = retry(
            "reconnect",
            MAX_RECONNECT_ATTEMPTS,
            Backoff::Linear(self.retry_cfg.base_delay),
            |err: &SessionError| matches!(err, SessionError::ChromeNotFound),
            |attempt| async move {
                info!("reconnect attempt {}", attempt);
                self.initialize().await?;
                let driver = self.driver().await?;
                driver.navigate(self.site.base_url.as_str()).await?;
                self.pacing.challenge_settle().await;
                if !self.check_login_status().await {
                    self.login().await?;
                }
                Ok(())
            },
        )
        .await;

        match result {
            Ok(()) => {
                self.set_state(SessionState::LoggedIn);
                Ok(())
            }
            Err(err) => Err(SessionError::ReconnectExhausted {
                attempts: MAX_RECONNECT_ATTEMPTS,
                last: err.to_string(),
            }),
        }
    }

    /// Releases the browser process. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            release_connection(conn).await;
        }
        self.set_state(SessionState::Uninitialized);
        info!("browser session released");
    }
}

async fn release_connection(conn: Connection) {
    {
        let mut browser = conn.browser.lock().await;
        if let Err(e) = browser.close().await {
            debug!("browser close failed: {}", e);
        }
        let _ = browser.wait().await;
    }
    conn.handler_task.abort();
}

fn find_chrome() -> Result<PathBuf, SessionError> {
    for path in CHROME_PATHS {
        let candidate = std::path::Path::new(path);
        if candidate.exists() {
            info!("found Chrome at: {}", path);
            return Ok(candidate.to_path_buf());
        }
    }

    for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    info!("found Chrome in PATH: {}", path);
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }

    Err(SessionError::ChromeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classification_covers_both_shapes() {
        let nav = SessionError::Driver(DriverError::NavigationTimeout {
            url: "https://example.com".into(),
            timeout_ms: 1000,
        });
        assert!(nav.is_timeout());
        assert!(SessionError::LoginFailed("login verification timed out".into()).is_timeout());
        assert!(!SessionError::LoginFailed("still on login page".into()).is_timeout());
        assert!(!SessionError::LoginRejected("bad password".into()).is_timeout());
    }

    #[test]
    fn fatal_classification_matches_session_preconditions() {
        assert!(SessionError::LoginRetriesExhausted {
            attempts: 3,
            last: "x".into()
        }
        .is_fatal());
        assert!(SessionError::ReconnectExhausted {
            attempts: 3,
            last: "x".into()
        }
        .is_fatal());
        assert!(SessionError::ChromeNotFound.is_fatal());
        assert!(!SessionError::LoginFailed("transient".into()).is_fatal());
    }

    #[test]
    fn state_transitions_update_without_browser() {
        let session = Session::new(
            crate::config::BrowserSettings {
                headless: true,
                default_timeout: Duration::from_secs(1),
                nav_timeout: Duration::from_secs(1),
                user_agent: "test".into(),
                profile_dir: None,
            },
            RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            SiteConfig {
                base_url: url::Url::parse("https://example.com").unwrap(),
                login_url: url::Url::parse("https://example.com/login").unwrap(),
                jobs_url: url::Url::parse("https://example.com/jobs").unwrap(),
                credentials: None,
            },
            Pacing::off(),
        );
        assert_eq!(session.state(), SessionState::Uninitialized);
        session.set_state(SessionState::Initializing);
        session.set_state(SessionState::Ready);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn login_without_connection_reports_missing_credentials_first() {
        let session = Session::new(
            crate::config::BrowserSettings {
                headless: true,
                default_timeout: Duration::from_secs(1),
                nav_timeout: Duration::from_secs(1),
                user_agent: "test".into(),
                profile_dir: None,
            },
            RetryConfig {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
            SiteConfig {
                base_url: url::Url::parse("https://example.com").unwrap(),
                login_url: url::Url::parse("https://example.com/login").unwrap(),
                jobs_url: url::Url::parse("https://example.com/jobs").unwrap(),
                credentials: None,
            },
            Pacing::off(),
        );
        assert!(matches!(
            session.login().await,
            Err(SessionError::MissingCredentials)
        ));
    }
}

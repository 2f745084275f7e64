//! Launch flags and page-level evasion for anti-automation checks.
//!
//! Based on puppeteer-extra-plugin-stealth techniques: the flags keep
//! Chromium from advertising automation, the scripts patch the DOM surface
//! the site's detector inspects.

use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use tracing::debug;

/// Flags passed at launch. `--no-sandbox` and `--disable-dev-shm-usage` keep
/// headless Chromium alive in containers.
pub const CHROME_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--metrics-recording-only",
    "--safebrowsing-disable-auto-update",
    "--no-sandbox",
    "--disable-gpu",
    "--disable-software-rasterizer",
    "--window-size=1366,768",
    "--lang=en-US,en",
];

/// Evasion JavaScript evaluated on every fresh tab.
const STEALTH_SCRIPTS: &[&str] = &[
    // Remove webdriver property
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    // Fix chrome object
    r#"
    window.chrome = {
        runtime: {},
        loadTimes: function() {},
        csi: function() {},
        app: {}
    };
    "#,
    // Fix permissions
    r#"
    const originalQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications' ?
        Promise.resolve({ state: Notification.permission }) :
        originalQuery(parameters)
    );
    "#,
    // Fix plugins (make it look like regular Chrome)
    r#"
    Object.defineProperty(navigator, 'plugins', {
        get: () => [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
            { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
        ],
        configurable: true
    });
    "#,
    // Fix languages
    r#"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });
    "#,
];

/// Applies the UA override and evasion scripts to a fresh tab.
///
/// The UA override must succeed; script injection is best-effort since it
/// can fail during page transitions without affecting the session.
pub async fn prepare_page(page: &Page, user_agent: &str) -> Result<(), CdpError> {
    page.execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
        .await?;

    for script in STEALTH_SCRIPTS {
        if let Err(e) = page.evaluate(script.to_string()).await {
            debug!("stealth script injection skipped: {}", e);
        }
    }

    Ok(())
}

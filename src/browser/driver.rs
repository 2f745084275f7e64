//! Single-tab driver: navigation with retry, selector waits, guarded clicks.
//!
//! Wraps one chromiumoxide [`Page`] plus the browser handle needed to
//! recreate it when the tab stops responding. Every wait is bounded by
//! `tokio::time::timeout`; a hung CDP call degrades to a retry or a typed
//! error, never a stalled pipeline.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, Page};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{BrowserSettings, RetryConfig};
use crate::retry::{retry, Backoff};

use super::pacing::Pacing;
use super::stealth;

/// How often `wait_for_any` re-polls its selector set.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Bound on the responsiveness probe, well under the navigation timeout.
const RESPONSIVE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Post-navigation settle before the page is considered usable.
const POST_NAV_SETTLE: Duration = Duration::from_millis(500);

/// Scroll stepping: 100px ticks, height re-measured every 5 ticks, at most
/// 8 strides (~4000px) per `scroll_to_bottom_in_steps` call.
const SCROLL_TICK_PX: u32 = 100;
const SCROLL_TICK_INTERVAL: Duration = Duration::from_millis(100);
const SCROLL_TICKS_PER_STEP: u32 = 5;
const MAX_SCROLL_STEPS: u32 = 8;

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },
    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("evaluation failed: {0}")]
    Evaluate(String),
    #[error("browser command failed: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
}

/// Drives one tab. Cheap to share behind an `Arc`; the page handle sits in a
/// mutex so an unresponsive tab can be swapped out under `&self`.
pub struct PageDriver {
    browser: Arc<Mutex<Browser>>,
    page: Mutex<Page>,
    settings: BrowserSettings,
    retry: RetryConfig,
    pacing: Pacing,
}

impl PageDriver {
    /// Opens a fresh tab and applies the UA override and evasion scripts.
    pub async fn open(
        browser: Arc<Mutex<Browser>>,
        settings: BrowserSettings,
        retry: RetryConfig,
        pacing: Pacing,
    ) -> Result<Self, DriverError> {
        let page = {
            let guard = browser.lock().await;
            guard.new_page("about:blank").await?
        };
        stealth::prepare_page(&page, &settings.user_agent).await?;
        Ok(Self {
            browser,
            page: Mutex::new(page),
            settings,
            retry,
            pacing,
        })
    }

    /// Clone of the current page handle; the tab itself is shared.
    pub async fn page(&self) -> Page {
        self.page.lock().await.clone()
    }

    pub fn default_timeout(&self) -> Duration {
        self.settings.default_timeout
    }

    /// Navigates with the shared retry budget. Before each retry the tab is
    /// probed: unresponsive tabs are discarded and recreated, responsive ones
    /// reloaded once, matching the cheapest recovery that could help.
    pub async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        retry(
            "navigate",
            self.retry.max_attempts,
            Backoff::Linear(self.retry.base_delay),
            |_: &DriverError| false,
            |attempt| async move {
                if attempt > 1 {
                    self.recover_tab().await;
                }
                self.navigate_once(url).await
            },
        )
        .await
    }

    async fn navigate_once(&self, url: &str) -> Result<(), DriverError> {
        debug!("navigating to {}", url);
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|reason| DriverError::NavigationFailed {
                url: url.to_string(),
                reason,
            })?;

        let page = self.page().await;
        timeout(self.settings.nav_timeout, page.execute(params))
            .await
            .map_err(|_| DriverError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: self.settings.nav_timeout.as_millis() as u64,
            })?
            .map_err(|e| DriverError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        self.wait_for_ready(&page).await;
        tokio::time::sleep(POST_NAV_SETTLE).await;
        Ok(())
    }

    /// Best-effort readiness wait; a stuck probe is logged, not fatal.
    async fn wait_for_ready(&self, page: &Page) {
        match timeout(
            self.settings.default_timeout,
            page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
        )
        .await
        {
            Ok(Ok(result)) => {
                let state: String = result.into_value().unwrap_or_else(|_| "unknown".to_string());
                debug!("page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("could not check ready state: {}", e),
            Err(_) => warn!("timeout waiting for page ready state"),
        }
    }

    async fn recover_tab(&self) {
        if self.is_responsive().await {
            debug!("tab responsive, reloading before retry");
            let page = self.page().await;
            if let Err(e) = page.reload().await {
                warn!("reload before retry failed: {}", e);
            }
        } else {
            warn!("tab unresponsive, recreating");
            if let Err(e) = self.recreate_tab().await {
                warn!("tab recreation failed: {}", e);
            }
        }
    }

    /// A trivial evaluation answering within the probe window means the tab
    /// is still serving CDP traffic.
    pub async fn is_responsive(&self) -> bool {
        let page = self.page().await;
        matches!(
            timeout(RESPONSIVE_PROBE_TIMEOUT, page.evaluate("true")).await,
            Ok(Ok(_))
        )
    }

    async fn recreate_tab(&self) -> Result<(), DriverError> {
        let fresh = {
            let guard = self.browser.lock().await;
            guard.new_page("about:blank").await?
        };
        stealth::prepare_page(&fresh, &self.settings.user_agent).await?;
        let stale = {
            let mut guard = self.page.lock().await;
            std::mem::replace(&mut *guard, fresh)
        };
        let _ = stale.close().await;
        Ok(())
    }

    /// Polls the selector set until one matches or the deadline passes.
    /// Returns the matched selector so callers can branch on markup variant.
    pub async fn wait_for_any<'a>(&self, selectors: &[&'a str], wait: Duration) -> Option<&'a str> {
        let deadline = tokio::time::Instant::now() + wait;
        let page = self.page().await;
        loop {
            for sel in selectors {
                if page.find_element(*sel).await.is_ok() {
                    return Some(*sel);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    pub async fn wait_for(&self, selector: &str, wait: Duration) -> bool {
        self.wait_for_any(&[selector], wait).await.is_some()
    }

    /// Whether the selector currently matches; no waiting.
    pub async fn exists(&self, selector: &str) -> bool {
        let page = self.page().await;
        page.find_element(selector).await.is_ok()
    }

    /// Guarded click: presence, scroll into view, computed-visibility check,
    /// humanized pause, click. Returns `false` instead of erroring so callers
    /// can walk alternate selectors.
    pub async fn click(&self, selector: &str) -> bool {
        let page = self.page().await;
        let element = match page.find_element(selector).await {
            Ok(element) => element,
            Err(_) => return false,
        };
        if element.scroll_into_view().await.is_err() {
            return false;
        }
        if !self.is_visible(selector).await {
            return false;
        }
        self.pacing.before_click().await;
        element.click().await.is_ok()
    }

    /// Computed-style visibility: attached, not display:none/hidden/opacity 0,
    /// and a non-empty box.
    pub async fn is_visible(&self, selector: &str) -> bool {
        let js = format!(
            r#"
            (() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                const style = window.getComputedStyle(el);
                if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') return false;
                const rect = el.getBoundingClientRect();
                return rect.width > 0 && rect.height > 0;
            }})()
            "#,
            sel = js_quote(selector)
        );
        self.evaluate::<bool>(&js).await.unwrap_or(false)
    }

    /// Types into a field character by character with humanized pauses.
    pub async fn type_into(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let page = self.page().await;
        let element = page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::ElementNotFound(selector.to_string()))?;
        element.click().await?;
        for ch in text.chars() {
            element.type_str(ch.to_string()).await?;
            self.pacing.typing_pause().await;
        }
        Ok(())
    }

    pub async fn press_escape(&self) -> Result<(), DriverError> {
        let page = self.page().await;
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key("Escape".to_string())
                .build()
                .map_err(DriverError::Evaluate)?;
            page.execute(params).await?;
        }
        Ok(())
    }

    /// Arbitrary in-page evaluation deserialized into `T`.
    pub async fn evaluate<T: DeserializeOwned>(&self, js: &str) -> Result<T, DriverError> {
        let page = self.page().await;
        let result = page
            .evaluate(js.to_string())
            .await
            .map_err(|e| DriverError::Evaluate(e.to_string()))?;
        result
            .into_value::<T>()
            .map_err(|e| DriverError::Evaluate(e.to_string()))
    }

    /// Evaluation where the result is irrelevant (scrolls, cleanup).
    pub async fn exec(&self, js: &str) -> Result<(), DriverError> {
        let page = self.page().await;
        page.evaluate(js.to_string())
            .await
            .map_err(|e| DriverError::Evaluate(e.to_string()))?;
        Ok(())
    }

    pub async fn scroll_by(&self, pixels: u32) -> Result<(), DriverError> {
        self.exec(&format!("window.scrollBy(0, {})", pixels)).await
    }

    pub async fn scroll_height(&self) -> Result<i64, DriverError> {
        self.evaluate("document.body.scrollHeight").await
    }

    /// Steps the viewport toward the bottom in 100px ticks, re-measuring the
    /// scrollable height after each stride, until the height stops growing or
    /// the step cap is hit. Lazy-loading listings append content on the way
    /// down, so the exit condition is measured rather than assumed.
    pub async fn scroll_to_bottom_in_steps(&self) -> Result<(), DriverError> {
        let mut last_height = self.scroll_height().await?;
        for _ in 0..MAX_SCROLL_STEPS {
            for _ in 0..SCROLL_TICKS_PER_STEP {
                self.scroll_by(SCROLL_TICK_PX).await?;
                tokio::time::sleep(SCROLL_TICK_INTERVAL).await;
            }
            let height = self.scroll_height().await?;
            if height <= last_height {
                break;
            }
            last_height = height;
        }
        Ok(())
    }

    pub async fn scroll_to_top(&self) -> Result<(), DriverError> {
        self.exec("window.scrollTo(0, 0)").await
    }

    pub async fn scroll_into_view(&self, selector: &str) -> bool {
        let js = format!(
            r#"
            (() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.scrollIntoView({{ block: 'center', behavior: 'instant' }});
                return true;
            }})()
            "#,
            sel = js_quote(selector)
        );
        self.evaluate::<bool>(&js).await.unwrap_or(false)
    }

    /// Full serialized DOM for `scraper`-side parsing.
    pub async fn content(&self) -> Result<String, DriverError> {
        let page = self.page().await;
        page.content().await.map_err(DriverError::Cdp)
    }

    pub async fn url(&self) -> Option<String> {
        let page = self.page().await;
        page.url().await.ok().flatten()
    }

    pub async fn clear_cookies(&self) -> Result<(), DriverError> {
        let page = self.page().await;
        page.execute(ClearBrowserCookiesParams::default()).await?;
        Ok(())
    }

    /// Closes the tab. Used by the scoped direct-capture cleanup.
    pub async fn close(self) {
        let page = self.page.into_inner();
        if let Err(e) = page.close().await {
            debug!("tab close failed: {}", e);
        }
    }
}

/// JSON-escapes a selector for embedding in evaluated snippets.
pub(crate) fn js_quote(selector: &str) -> String {
    serde_json::to_string(selector).unwrap_or_else(|_| format!("\"{}\"", selector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_quote_escapes_embedded_quotes() {
        assert_eq!(js_quote(r#"a[data-test="JobTile"]"#), r#""a[data-test=\"JobTile\"]""#);
    }
}

//! Modal-based detail capture.
//!
//! The primary strategy: click the listing tile, read the detail modal in
//! place, then close it so the listing page survives for the next job. The
//! whole flow stays on the shared page; only direct capture opens tabs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::browser::{Pacing, PageDriver};
use crate::models::{CaptureMethod, JobRecord, JobReference};
use crate::retry::{retry, Backoff};

use super::capture::{scan_error_states, CaptureError, CaptureStrategy};
use super::fields::PageReader;

/// Internal attempt budget before the chain falls back to direct capture.
const MODAL_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(1_500);
/// How long a clicked tile gets to render a modal indicator.
const MODAL_WAIT: Duration = Duration::from_secs(5);

/// Any of these signals the detail modal rendered.
const MODAL_INDICATORS: &[&str] = &[
    "[data-test=\"SaveJob\"]",
    "[data-test=\"job-details-modal\"]",
    "div[role=\"dialog\"]",
];

/// Close buttons, walked in order before falling back to Escape.
const CLOSE_SELECTORS: &[&str] = &[
    "div[data-test=\"UpCIcon\"].air3-slider-prev-icon",
    "[data-test=\"close-modal\"]",
    "button[aria-label=\"Close\"]",
    ".modal-close-button",
];

/// Still-open probe used after close attempts and between retries.
const MODAL_OPEN_MARKER: &str = "div[role=\"dialog\"]";

pub struct ModalStrategy {
    driver: Arc<PageDriver>,
    pacing: Pacing,
    reader: PageReader,
}

impl ModalStrategy {
    pub fn new(driver: Arc<PageDriver>, pacing: Pacing, reader: PageReader) -> Self {
        Self {
            driver,
            pacing,
            reader,
        }
    }

    /// Tile lookups vary by markup version; tried in order.
    fn tile_selectors(job_id: &str) -> [String; 4] {
        [
            format!("article[data-ev-job-uid=\"{job_id}\"]"),
            format!("div[data-ev-job-uid=\"{job_id}\"]"),
            format!("[data-job-id=\"{job_id}\"]"),
            format!("[data-test=\"job-tile\"][data-job-uid=\"{job_id}\"]"),
        ]
    }

    async fn attempt(&self, job: &JobReference) -> Result<JobRecord, CaptureError> {
        self.pacing.brief_pause().await;

        let mut clicked = false;
        for selector in Self::tile_selectors(&job.id) {
            if !self.driver.exists(&selector).await {
                continue;
            }
            self.driver.scroll_into_view(&selector).await;
            if self.driver.click(&selector).await {
                clicked = true;
                break;
            }
        }
        if !clicked {
            return Err(CaptureError::Retryable(
                "job tile not found or not clickable".into(),
            ));
        }

        if self
            .driver
            .wait_for_any(MODAL_INDICATORS, MODAL_WAIT)
            .await
            .is_none()
        {
            return Err(CaptureError::Retryable(
                "modal failed to open - no modal indicators found".into(),
            ));
        }

        // Error banners can render after the modal shell does.
        self.pacing.settle_pause().await;
        if let Some(reason) = scan_error_states(&self.driver).await {
            return Err(CaptureError::Terminal(reason));
        }

        let html = self.driver.content().await?;
        let record = self
            .reader
            .read(&html, &job.id, &job.href, CaptureMethod::Modal);
        let missing = record.missing_fields();
        if !missing.is_empty() {
            return Err(CaptureError::Validation(missing));
        }

        self.close_modal().await;
        Ok(record)
    }

    /// Close-button walk, Escape fallback, then a verify pass. Failure to
    /// close is logged rather than raised; the record is already extracted.
    async fn close_modal(&self) {
        for selector in CLOSE_SELECTORS {
            if self.driver.click(selector).await {
                self.verify_closed().await;
                return;
            }
        }
        if let Err(e) = self.driver.press_escape().await {
            debug!("escape dispatch failed: {}", e);
        }
        warn!("closed modal with Escape after close buttons failed");
        self.verify_closed().await;
    }

    async fn verify_closed(&self) {
        self.pacing.settle_pause().await;
        if self.driver.exists(MODAL_OPEN_MARKER).await {
            warn!("modal still open after close attempts");
            let _ = self.driver.press_escape().await;
        }
    }

    /// A stuck modal swallows the next tile click, so every retry starts by
    /// dismissing whatever the failed attempt left behind.
    async fn dismiss_stuck_modal(&self) {
        if let Err(e) = self.driver.press_escape().await {
            debug!("escape dispatch failed: {}", e);
            return;
        }
        self.pacing.settle_pause().await;
        if self.driver.exists(MODAL_OPEN_MARKER).await {
            let _ = self.driver.press_escape().await;
            self.pacing.settle_pause().await;
        }
    }
}

#[async_trait]
impl CaptureStrategy for ModalStrategy {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::Modal
    }

    async fn capture(&self, job: &JobReference) -> Result<JobRecord, CaptureError> {
        let label = format!("modal capture {}", job.id);
        retry(
            &label,
            MODAL_ATTEMPTS,
            Backoff::Fixed(RETRY_DELAY),
            CaptureError::is_terminal,
            |attempt| async move {
                if attempt > 1 {
                    self.dismiss_stuck_modal().await;
                }
                self.attempt(job).await
            },
        )
        .await
        .map_err(|err| match err {
            terminal @ CaptureError::Terminal(_) => terminal,
            other => CaptureError::Retryable(format!(
                "modal scraping failed after {MODAL_ATTEMPTS} attempts: {other}"
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_selectors_embed_the_job_id() {
        let selectors = ModalStrategy::tile_selectors("~01abc");
        assert_eq!(selectors[0], "article[data-ev-job-uid=\"~01abc\"]");
        assert!(selectors.iter().all(|s| s.contains("~01abc")));
    }
}

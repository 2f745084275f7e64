//! Direct-permalink detail capture.
//!
//! The fallback strategy: open the posting's permalink in a fresh tab, read
//! the full detail page, and close the tab however the attempt ends. Keeping
//! each attempt in its own tab leaves the shared listing page untouched for
//! the rest of the cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Browser;
use tokio::sync::Mutex;
use tracing::debug;

use crate::browser::{Pacing, PageDriver};
use crate::config::{BrowserSettings, RetryConfig};
use crate::models::{CaptureMethod, JobRecord, JobReference};

use super::capture::{scan_error_states, CaptureError, CaptureStrategy};
use super::fields::PageReader;

/// Any of these means the detail page actually rendered its body.
const CONTENT_SELECTORS: &[&str] = &[
    "[data-test=\"job-description\"]",
    ".job-description",
    ".up-card-section",
];
const CONTENT_WAIT: Duration = Duration::from_secs(5);

pub struct DirectStrategy {
    browser: Arc<Mutex<Browser>>,
    settings: BrowserSettings,
    retry: RetryConfig,
    pacing: Pacing,
    reader: PageReader,
}

impl DirectStrategy {
    pub fn new(
        browser: Arc<Mutex<Browser>>,
        settings: BrowserSettings,
        retry: RetryConfig,
        pacing: Pacing,
        reader: PageReader,
    ) -> Self {
        Self {
            browser,
            settings,
            retry,
            pacing,
            reader,
        }
    }

    async fn capture_inner(
        &self,
        driver: &PageDriver,
        job: &JobReference,
    ) -> Result<JobRecord, CaptureError> {
        debug!(job = %job.id, url = %job.href, "opening permalink in a fresh tab");
        driver.navigate(&job.href).await?;
        self.pacing.settle_pause().await;

        if let Some(reason) = scan_error_states(driver).await {
            return Err(CaptureError::Terminal(reason));
        }
        let found = driver.wait_for_any(CONTENT_SELECTORS, CONTENT_WAIT).await;
        if found.is_none() {
            return Err(CaptureError::Retryable(
                "job content not found on page".into(),
            ));
        }

        let html = driver.content().await?;
        let record = self
            .reader
            .read(&html, &job.id, &job.href, CaptureMethod::DirectUrl);
        let missing = record.missing_fields();
        if !missing.is_empty() {
            return Err(CaptureError::Validation(missing));
        }
        Ok(record)
    }
}

#[async_trait]
impl CaptureStrategy for DirectStrategy {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::DirectUrl
    }

    async fn capture(&self, job: &JobReference) -> Result<JobRecord, CaptureError> {
        let driver = PageDriver::open(
            self.browser.clone(),
            self.settings.clone(),
            self.retry,
            self.pacing.clone(),
        )
        .await?;
        // The tab closes no matter how the attempt went; stray tabs pile up
        // against the browser process otherwise.
        let result = self.capture_inner(&driver, job).await;
        driver.close().await;
        result
    }
}

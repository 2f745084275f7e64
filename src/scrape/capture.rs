//! Capture strategies and failure classification.
//!
//! Each job reference runs through a fixed-order strategy chain (modal view
//! first, direct permalink second). Errors are classified retryable or
//! terminal: terminal states are site-reported verdicts about the posting
//! itself, so neither retries nor the fallback strategy can change them.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use crate::browser::driver::js_quote;
use crate::browser::{DriverError, PageDriver};
use crate::models::{CaptureMethod, JobRecord, JobReference, ProcessingOutcome};

/// Site-reported states that make a posting permanently uncapturable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    AccessDenied,
    JobDeleted,
    ContentBlocked,
    NotAvailable,
}

impl TerminalReason {
    /// Skip reason recorded on the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::JobDeleted => "job_deleted",
            Self::ContentBlocked => "content_blocked",
            Self::NotAvailable => "not_available",
        }
    }

    /// Banner phrase the site renders for this state.
    pub fn phrase(&self) -> &'static str {
        match self {
            Self::AccessDenied => "access denied",
            Self::JobDeleted => "job deleted",
            Self::ContentBlocked => "content blocked",
            Self::NotAvailable => "job not available",
        }
    }
}

/// Error-state banners scanned before any field extraction.
pub const ERROR_STATES: &[(TerminalReason, &str)] = &[
    (
        TerminalReason::AccessDenied,
        "h1.mt-5.mb-4.text-light-on-muted, [data-test=\"access-denied\"]",
    ),
    (
        TerminalReason::JobDeleted,
        "[data-test=\"job-deleted\"], .job-deleted-message",
    ),
    (
        TerminalReason::ContentBlocked,
        ".blocked-content-message, .content-blocked",
    ),
    (
        TerminalReason::NotAvailable,
        ".job-details-error, .job-not-found",
    ),
];

/// Scans the live page for any [`ERROR_STATES`] banner. Presence plus phrase
/// match, so a stray utility class cannot misclassify a healthy detail view
/// as an error state. Both strategies run this before extracting fields.
pub(crate) async fn scan_error_states(driver: &PageDriver) -> Option<TerminalReason> {
    for (reason, selector) in ERROR_STATES {
        let js = format!(
            r#"
            (() => {{
                const el = document.querySelector({sel});
                return el ? (el.textContent || '').toLowerCase().includes({phrase}) : false;
            }})()
            "#,
            sel = js_quote(selector),
            phrase = js_quote(reason.phrase()),
        );
        if driver.evaluate::<bool>(&js).await.unwrap_or(false) {
            return Some(*reason);
        }
    }
    None
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The site reports the posting as permanently unavailable.
    #[error("{}", .0.phrase())]
    Terminal(TerminalReason),
    /// Transient failure; a retry or another strategy may still succeed.
    #[error("{0}")]
    Retryable(String),
    /// Extraction ran but the record is missing required fields.
    #[error("incomplete job details - missing: {}", .0.join(", "))]
    Validation(Vec<&'static str>),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl CaptureError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// One way of reaching a job's detail view.
#[async_trait]
pub trait CaptureStrategy: Send + Sync {
    fn method(&self) -> CaptureMethod;
    async fn capture(&self, job: &JobReference) -> Result<JobRecord, CaptureError>;
}

/// Runs strategies in order until one succeeds.
///
/// A terminal error from any strategy ends the chain as `Skipped`; later
/// strategies are never attempted for a posting the site reports gone. When
/// every strategy fails non-terminally the outcome is `Failed`, carrying
/// each strategy's error message.
pub async fn capture_with_fallback(
    strategies: &[&dyn CaptureStrategy],
    job: &JobReference,
) -> ProcessingOutcome {
    let mut errors: Vec<String> = Vec::new();
    for strategy in strategies {
        let method = strategy.method();
        match strategy.capture(job).await {
            Ok(record) => return ProcessingOutcome::Success(record),
            Err(CaptureError::Terminal(reason)) => {
                return ProcessingOutcome::Skipped {
                    job_id: job.id.clone(),
                    reason: reason.as_str().to_string(),
                };
            }
            Err(err) => {
                warn!(
                    job = %job.id,
                    method = method.as_str(),
                    error = %err,
                    "capture strategy failed"
                );
                errors.push(format!("{}: {}", method.as_str(), err));
            }
        }
    }
    ProcessingOutcome::Failed {
        job_id: job.id.clone(),
        error: errors.join("; "),
        url: job.href.clone(),
        at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::models::{ClientProfile, PaymentTerms};

    use super::*;

    enum Script {
        Succeed,
        Terminal(TerminalReason),
        Fail(&'static str),
    }

    struct Scripted {
        method: CaptureMethod,
        script: Script,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(method: CaptureMethod, script: Script) -> Self {
            Self {
                method,
                script,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CaptureStrategy for Scripted {
        fn method(&self) -> CaptureMethod {
            self.method
        }

        async fn capture(&self, job: &JobReference) -> Result<JobRecord, CaptureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::Succeed => Ok(record_for(job, self.method)),
                Script::Terminal(reason) => Err(CaptureError::Terminal(reason)),
                Script::Fail(msg) => Err(CaptureError::Retryable(msg.into())),
            }
        }
    }

    fn record_for(job: &JobReference, method: CaptureMethod) -> JobRecord {
        JobRecord {
            job_id: job.id.clone(),
            url: job.href.clone(),
            title: "Rust engineer".into(),
            description: "Build a scraper".into(),
            posted_date: None,
            location: None,
            project_type: None,
            experience_level: None,
            required_connects: None,
            payment: PaymentTerms::default(),
            skills: Vec::new(),
            screening_questions: Vec::new(),
            featured: false,
            client: ClientProfile::default(),
            client_history: Vec::new(),
            scraped_at: Utc::now(),
            method,
        }
    }

    fn job() -> JobReference {
        JobReference::new("~01abc", "https://jobs.example/jobs/~01abc")
    }

    #[tokio::test]
    async fn chain_stops_at_first_success() {
        let modal = Scripted::new(CaptureMethod::Modal, Script::Succeed);
        let direct = Scripted::new(CaptureMethod::DirectUrl, Script::Succeed);
        let outcome = capture_with_fallback(&[&modal, &direct], &job()).await;
        assert!(outcome.is_success());
        assert_eq!(modal.calls(), 1);
        assert_eq!(direct.calls(), 0);
    }

    #[tokio::test]
    async fn terminal_error_skips_without_fallback() {
        let modal = Scripted::new(CaptureMethod::Modal, Script::Terminal(TerminalReason::JobDeleted));
        let direct = Scripted::new(CaptureMethod::DirectUrl, Script::Succeed);
        let outcome = capture_with_fallback(&[&modal, &direct], &job()).await;
        match outcome {
            ProcessingOutcome::Skipped { job_id, reason } => {
                assert_eq!(job_id, "~01abc");
                assert_eq!(reason, "job_deleted");
            }
            other => panic!("expected skip, got {:?}", other),
        }
        assert_eq!(direct.calls(), 0);
    }

    #[tokio::test]
    async fn fallback_runs_once_and_decides_the_outcome() {
        let modal = Scripted::new(CaptureMethod::Modal, Script::Fail("modal failed to open"));
        let direct = Scripted::new(CaptureMethod::DirectUrl, Script::Succeed);
        let outcome = capture_with_fallback(&[&modal, &direct], &job()).await;
        match outcome {
            ProcessingOutcome::Success(record) => {
                assert_eq!(record.method, CaptureMethod::DirectUrl)
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(modal.calls(), 1);
        assert_eq!(direct.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_every_strategy_error() {
        let modal = Scripted::new(CaptureMethod::Modal, Script::Fail("modal failed to open"));
        let direct = Scripted::new(CaptureMethod::DirectUrl, Script::Fail("job content not found"));
        let outcome = capture_with_fallback(&[&modal, &direct], &job()).await;
        match outcome {
            ProcessingOutcome::Failed { error, url, .. } => {
                assert!(error.contains("modal: modal failed to open"));
                assert!(error.contains("direct_url: job content not found"));
                assert_eq!(url, "https://jobs.example/jobs/~01abc");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn terminal_error_in_fallback_also_skips() {
        let modal = Scripted::new(CaptureMethod::Modal, Script::Fail("modal failed to open"));
        let direct = Scripted::new(
            CaptureMethod::DirectUrl,
            Script::Terminal(TerminalReason::NotAvailable),
        );
        let outcome = capture_with_fallback(&[&modal, &direct], &job()).await;
        match outcome {
            ProcessingOutcome::Skipped { reason, .. } => assert_eq!(reason, "not_available"),
            other => panic!("expected skip, got {:?}", other),
        }
    }
}

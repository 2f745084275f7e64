//! The capture pipeline: authenticated traversal, per-job capture, batching.
//!
//! One [`Pipeline`] owns the browser session and drives the whole flow:
//! establish an authenticated session, read the listing, run every new
//! reference through the strategy chain, and flush batches to the store.
//! Jobs are strictly sequential; the site penalizes concurrent actions from
//! one identity, so there is nothing to parallelize.

pub mod capture;
pub mod direct;
pub mod fields;
pub mod listing;
pub mod modal;
pub mod tracker;

pub use capture::{capture_with_fallback, CaptureError, CaptureStrategy, TerminalReason};
pub use direct::DirectStrategy;
pub use fields::{FieldMap, PageReader};
pub use modal::ModalStrategy;
pub use tracker::{CycleStats, Tracker};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::browser::{Pacing, Session, SessionError};
use crate::config::Config;
use crate::models::ProcessingOutcome;
use crate::store::JobStore;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Long-lived pipeline state. The processed set and batch survive across
/// scheduler windows; only a process restart clears them.
pub struct Pipeline {
    config: Config,
    session: Session,
    store: Arc<dyn JobStore>,
    pacing: Pacing,
    reader: PageReader,
    tracker: Mutex<Tracker>,
    running: AtomicBool,
}

/// Clears the running flag on every exit path, a panic included.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Pipeline {
    pub fn new(config: Config, session: Session, store: Arc<dyn JobStore>) -> Self {
        let pacing = Pacing::new(&config.pacing);
        let tracker = Mutex::new(Tracker::new(config.store.batch_size));
        Self {
            config,
            session,
            store,
            pacing,
            reader: PageReader::new(),
            tracker,
            running: AtomicBool::new(false),
        }
    }

    /// Runs cycles until `stop` flips or a session-fatal error ends the
    /// pipeline. Overlapping invocations are rejected: the second caller
    /// logs a warning and returns immediately.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<(), PipelineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("pipeline already running, ignoring start request");
            return Ok(());
        }
        let _guard = RunningGuard(&self.running);
        self.run_inner(&mut stop).await
    }

    /// One traversal cycle without the scheduler: session up, cycle, session
    /// down. Backs the `once` command.
    pub async fn run_once(&self) -> Result<CycleStats, PipelineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("pipeline already running, ignoring start request");
            return Ok(CycleStats::default());
        }
        let _guard = RunningGuard(&self.running);
        // The sender must outlive the cycle or the receiver reads as stopped.
        let (_stop_tx, mut stop) = watch::channel(false);

        let result = async {
            self.setup_session().await?;
            self.run_cycle(&mut stop).await
        }
        .await;
        self.session.shutdown().await;
        Ok(result?)
    }

    async fn run_inner(&self, stop: &mut watch::Receiver<bool>) -> Result<(), PipelineError> {
        if let Err(err) = self.setup_session().await {
            self.session.shutdown().await;
            return Err(err.into());
        }

        let result = loop {
            if *stop.borrow() {
                break Ok(());
            }
            match self.run_cycle(stop).await {
                Ok(stats) => {
                    let keep_going = if stats.found == 0 {
                        info!("no new jobs found, waiting before refresh");
                        pause_unless_stopped(stop, self.pacing.before_refresh()).await
                    } else {
                        pause_unless_stopped(stop, self.pacing.brief_pause()).await
                    };
                    if !keep_going {
                        break Ok(());
                    }
                }
                Err(err) if err.is_fatal() => {
                    self.tracker.lock().await.discard();
                    break Err(err);
                }
                Err(err) => {
                    warn!(error = %err, "cycle failed, refreshing and retrying");
                    self.tracker.lock().await.discard();
                    if !pause_unless_stopped(stop, self.pacing.before_refresh()).await {
                        break Ok(());
                    }
                }
            }
        };

        // Wind-down on every exit: flush what survived, release the browser.
        self.tracker.lock().await.flush(self.store.as_ref()).await;
        self.session.shutdown().await;
        match result {
            Ok(()) => {
                info!("pipeline stopped");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Launch, land on the site origin, and authenticate unless an earlier
    /// session (persistent profile) is still live.
    async fn setup_session(&self) -> Result<(), SessionError> {
        self.session.initialize().await?;
        let driver = self.session.driver().await?;
        driver.navigate(self.config.site.base_url.as_str()).await?;
        self.pacing.challenge_settle().await;

        if self.session.check_login_status().await {
            info!("existing session still authenticated");
        } else {
            self.session.login_with_retry().await?;
        }
        Ok(())
    }

    /// One full traversal: list, capture each new reference, flush, report.
    async fn run_cycle(&self, stop: &mut watch::Receiver<bool>) -> Result<CycleStats, SessionError> {
        self.session.ensure_connected().await?;
        let driver = self.session.driver().await?;
        let browser = self.session.browser().await?;

        driver.navigate(self.config.site.jobs_url.as_str()).await?;
        self.pacing.challenge_settle().await;
        listing::load_more(&driver, &self.pacing).await?;

        let html = driver.content().await?;
        let references = {
            let tracker = self.tracker.lock().await;
            listing::extract_references(&html, &self.config.site.base_url, tracker.processed())
        };
        self.tracker.lock().await.begin_cycle(references.len());

        if references.is_empty() {
            return Ok(self.tracker.lock().await.cycle());
        }
        info!(count = references.len(), "found new job references");

        // Strategies are rebuilt each cycle; a reconnect swaps the tab and
        // browser handles underneath us.
        let modal = ModalStrategy::new(driver.clone(), self.pacing.clone(), self.reader.clone());
        let direct = DirectStrategy::new(
            browser,
            self.config.browser.clone(),
            self.config.retry,
            self.pacing.clone(),
            self.reader.clone(),
        );
        let strategies: [&dyn CaptureStrategy; 2] = [&modal, &direct];

        let total = references.len();
        for (index, job) in references.iter().enumerate() {
            if *stop.borrow() {
                info!("stop requested, abandoning the rest of the cycle");
                break;
            }
            info!(job = %job.id, index = index + 1, total, "processing job");

            let outcome = capture_with_fallback(&strategies, job).await;
            log_outcome(&outcome);
            {
                let mut tracker = self.tracker.lock().await;
                tracker.record(outcome);
                tracker.flush_if_full(self.store.as_ref()).await;
            }

            if !pause_unless_stopped(stop, self.pacing.between_jobs()).await {
                break;
            }
        }

        let stats = {
            let mut tracker = self.tracker.lock().await;
            tracker.flush(self.store.as_ref()).await;
            tracker.cycle()
        };
        let store_total = match self.store.list_keys().await {
            Ok(keys) => Some(keys.len()),
            Err(err) => {
                warn!(error = %err, "store count unavailable");
                None
            }
        };
        info!(
            found = stats.found,
            captured = stats.captured,
            skipped = stats.skipped,
            failed = stats.failed,
            store_total = ?store_total,
            "cycle complete"
        );
        Ok(stats)
    }
}

fn log_outcome(outcome: &ProcessingOutcome) {
    match outcome {
        ProcessingOutcome::Success(record) => info!(
            job = %record.job_id,
            method = record.method.as_str(),
            title = %record.title,
            "job captured"
        ),
        ProcessingOutcome::Skipped { job_id, reason } => {
            info!(job = %job_id, reason = %reason, "job skipped")
        }
        ProcessingOutcome::Failed { job_id, error, .. } => {
            error!(job = %job_id, error = %error, "job processing failed")
        }
    }
}

/// Waits out a pacing pause unless a stop request lands first. Returns
/// `false` when the pipeline should wind down, a dropped sender included.
async fn pause_unless_stopped(
    stop: &mut watch::Receiver<bool>,
    pause: impl Future<Output = ()>,
) -> bool {
    tokio::select! {
        _ = pause => true,
        changed = stop.changed() => match changed {
            Ok(()) => !*stop.borrow(),
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::{
        BrowserSettings, PacingConfig, RetryConfig, SiteConfig, StoreConfig,
    };
    use crate::scheduler::Parity;
    use crate::store::MemoryStore;

    use super::*;

    fn test_config() -> Config {
        let base_url = url::Url::parse("https://jobs.example").unwrap();
        Config {
            site: SiteConfig {
                login_url: base_url.join("/login").unwrap(),
                jobs_url: base_url.join("/find-work").unwrap(),
                base_url,
                credentials: None,
            },
            store: StoreConfig {
                url: "redis://127.0.0.1:6379".into(),
                key_prefix: "test:jobs:".into(),
                batch_size: 10,
                record_ttl_secs: 600,
            },
            browser: BrowserSettings {
                headless: true,
                default_timeout: Duration::from_secs(1),
                nav_timeout: Duration::from_secs(1),
                user_agent: "test".into(),
                profile_dir: None,
            },
            retry: RetryConfig {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
            pacing: PacingConfig::default(),
            parity: Parity::Even,
            health_addr: "127.0.0.1:0".parse().unwrap(),
        }
    }

    fn test_pipeline() -> Pipeline {
        let config = test_config();
        let session = Session::new(
            config.browser.clone(),
            config.retry,
            config.site.clone(),
            Pacing::off(),
        );
        Pipeline::new(config, session, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn overlapping_run_is_rejected_without_touching_the_session() {
        let pipeline = test_pipeline();
        pipeline.running.store(true, Ordering::SeqCst);

        let (_tx, stop) = watch::channel(false);
        // Returns Ok immediately; a real start would fail launching a browser.
        pipeline.run(stop).await.unwrap();
        assert!(pipeline.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn overlapping_run_once_reports_an_empty_cycle() {
        let pipeline = test_pipeline();
        pipeline.running.store(true, Ordering::SeqCst);
        let stats = pipeline.run_once().await.unwrap();
        assert_eq!(stats, CycleStats::default());
    }

    #[tokio::test]
    async fn pause_completes_when_no_stop_arrives() {
        let (_tx, mut stop) = watch::channel(false);
        let finished =
            pause_unless_stopped(&mut stop, tokio::time::sleep(Duration::from_millis(1))).await;
        assert!(finished);
    }

    #[tokio::test]
    async fn pause_is_cut_short_by_a_stop_request() {
        let (tx, mut stop) = watch::channel(false);
        tx.send(true).unwrap();
        let finished =
            pause_unless_stopped(&mut stop, tokio::time::sleep(Duration::from_secs(30))).await;
        assert!(!finished);
    }

    #[tokio::test]
    async fn dropped_stop_sender_counts_as_a_stop() {
        let (tx, mut stop) = watch::channel(false);
        drop(tx);
        let finished =
            pause_unless_stopped(&mut stop, tokio::time::sleep(Duration::from_secs(30))).await;
        assert!(!finished);
    }
}

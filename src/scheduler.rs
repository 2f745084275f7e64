//! Hour-parity scheduling.
//!
//! Two instances can watch the same board without overlapping: each one
//! claims the local hours whose parity matches its configured identity and
//! idles through the rest. The scheduler re-reads the wall clock once a
//! minute and starts or stops the capture pipeline when the answer changes,
//! so a parity flip produces exactly one transition.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::scrape::{Pipeline, PipelineError};
use crate::server::AppStatus;

/// How often the wall clock is compared against the configured parity.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Which local hours an instance claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Parity::Even => "even",
            Parity::Odd => "odd",
        }
    }

    /// True when the given hour (0-23) falls inside this instance's window.
    pub fn matches_hour(&self, hour: u32) -> bool {
        match self {
            Parity::Even => hour % 2 == 0,
            Parity::Odd => hour % 2 == 1,
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "even" => Ok(Parity::Even),
            "odd" => Ok(Parity::Odd),
            other => Err(format!("expected \"even\" or \"odd\", got \"{other}\"")),
        }
    }
}

/// An active window: the pipeline task plus the handle that stops it.
struct Window {
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<(), PipelineError>>,
}

/// Drives the pipeline in and out of this instance's active hours.
pub struct Scheduler {
    parity: Parity,
    pipeline: Arc<Pipeline>,
    status: Arc<AppStatus>,
}

impl Scheduler {
    pub fn new(parity: Parity, pipeline: Arc<Pipeline>, status: Arc<AppStatus>) -> Self {
        Self {
            parity,
            pipeline,
            status,
        }
    }

    /// Minute loop. Returns when the shutdown channel flips, or with the
    /// pipeline's error when an active window dies fatally.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        let mut ticker = tokio::time::interval(CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut window: Option<Window> = None;

        info!(instance = %self.parity, "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(open) = window.take_if(|w| w.task.is_finished()) {
                        // The pipeline returned without being asked to stop.
                        self.status.set_active(false);
                        match open.task.await {
                            Ok(Ok(())) => warn!("pipeline stopped outside a parity transition"),
                            Ok(Err(err)) => {
                                error!(error = %err, "pipeline failed");
                                return Err(err);
                            }
                            Err(join_err) => warn!(error = %join_err, "pipeline task panicked"),
                        }
                    }

                    let hour = Local::now().hour();
                    match (&window, self.parity.matches_hour(hour)) {
                        (None, true) => {
                            info!(hour, instance = %self.parity, "entering active window");
                            window = Some(self.open_window());
                        }
                        (Some(_), false) => {
                            info!(hour, instance = %self.parity, "leaving active window");
                            if let Some(open) = window.take() {
                                self.close_window(open).await?;
                            }
                        }
                        _ => {}
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        if let Some(open) = window.take() {
                            self.close_window(open).await?;
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    fn open_window(&self) -> Window {
        let (stop_tx, stop_rx) = watch::channel(false);
        let pipeline = Arc::clone(&self.pipeline);
        let task = tokio::spawn(async move { pipeline.run(stop_rx).await });
        self.status.set_active(true);
        Window {
            stop: stop_tx,
            task,
        }
    }

    /// Signals the window to stop and waits for the in-flight cycle to wind
    /// down, so the pending batch gets flushed and the browser released.
    async fn close_window(&self, window: Window) -> Result<(), PipelineError> {
        let _ = window.stop.send(true);
        self.status.set_active(false);
        match window.task.await {
            Ok(result) => result,
            Err(join_err) => {
                warn!(error = %join_err, "pipeline task panicked during wind-down");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_parity_claims_even_hours() {
        let parity = Parity::Even;
        assert!(parity.matches_hour(0));
        assert!(parity.matches_hour(14));
        assert!(parity.matches_hour(22));
        assert!(!parity.matches_hour(1));
        assert!(!parity.matches_hour(23));
    }

    #[test]
    fn odd_parity_claims_odd_hours() {
        let parity = Parity::Odd;
        assert!(parity.matches_hour(1));
        assert!(parity.matches_hour(13));
        assert!(!parity.matches_hour(0));
        assert!(!parity.matches_hour(12));
    }

    #[test]
    fn both_parities_cover_every_hour_once() {
        for hour in 0..24 {
            assert_ne!(
                Parity::Even.matches_hour(hour),
                Parity::Odd.matches_hour(hour)
            );
        }
    }

    #[test]
    fn parity_parses_case_insensitively() {
        assert_eq!("even".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("ODD".parse::<Parity>().unwrap(), Parity::Odd);
        assert_eq!(" Odd ".parse::<Parity>().unwrap(), Parity::Odd);
        assert!("weekly".parse::<Parity>().is_err());
    }
}

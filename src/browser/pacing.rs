//! Humanized pacing between browser actions.
//!
//! Uniform delays make automation trivially fingerprintable, so every wait
//! is sampled from a configured range. The pipeline, driver, and login flow
//! all call through one `Pacing` value; tests construct it with [`Pacing::off`]
//! so nothing sleeps.

use std::time::Duration;

use rand::Rng;

use crate::config::{DelayRange, PacingConfig};

const TYPING_DELAY: DelayRange = DelayRange::new(50, 150);
const CLICK_DELAY: DelayRange = DelayRange::new(400, 1_200);
const BRIEF_DELAY: DelayRange = DelayRange::new(500, 1_000);
const SETTLE_DELAY: DelayRange = DelayRange::new(1_000, 2_000);

/// Randomized waits applied between interactions.
#[derive(Debug, Clone)]
pub struct Pacing {
    job_delay: DelayRange,
    refresh_delay: DelayRange,
    challenge_wait: DelayRange,
    enabled: bool,
}

impl Pacing {
    pub fn new(config: &PacingConfig) -> Self {
        Self {
            job_delay: config.job_delay,
            refresh_delay: config.refresh_delay,
            challenge_wait: config.challenge_wait,
            enabled: true,
        }
    }

    /// Zero-delay variant; keeps tests instant.
    pub fn off() -> Self {
        Self {
            job_delay: DelayRange::new(0, 0),
            refresh_delay: DelayRange::new(0, 0),
            challenge_wait: DelayRange::new(0, 0),
            enabled: false,
        }
    }

    pub fn sample(&self, range: DelayRange) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        if range.min_ms >= range.max_ms {
            return range.min();
        }
        let ms = rand::thread_rng().gen_range(range.min_ms..=range.max_ms);
        Duration::from_millis(ms)
    }

    /// Pause between consecutive job captures.
    pub async fn between_jobs(&self) {
        tokio::time::sleep(self.sample(self.job_delay)).await;
    }

    /// Pause before re-reading the listing page.
    pub async fn before_refresh(&self) {
        tokio::time::sleep(self.sample(self.refresh_delay)).await;
    }

    /// Settle time after navigation so challenge interstitials can clear.
    pub async fn challenge_settle(&self) {
        tokio::time::sleep(self.sample(self.challenge_wait)).await;
    }

    /// Per-character pause while typing into a form field.
    pub async fn typing_pause(&self) {
        tokio::time::sleep(self.sample(TYPING_DELAY)).await;
    }

    /// Pause between scrolling an element into view and clicking it.
    pub async fn before_click(&self) {
        tokio::time::sleep(self.sample(CLICK_DELAY)).await;
    }

    /// Short pause for late-rendering content, e.g. modal error banners.
    pub async fn brief_pause(&self) {
        tokio::time::sleep(self.sample(BRIEF_DELAY)).await;
    }

    /// Pause after opening a detail view before reading it.
    pub async fn settle_pause(&self) {
        tokio::time::sleep(self.sample(SETTLE_DELAY)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_stays_within_bounds() {
        let pacing = Pacing::new(&PacingConfig::default());
        let range = DelayRange::new(100, 200);
        for _ in 0..50 {
            let d = pacing.sample(range);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn disabled_pacing_never_waits() {
        let pacing = Pacing::off();
        assert_eq!(pacing.sample(DelayRange::new(5_000, 9_000)), Duration::ZERO);
    }

    #[test]
    fn degenerate_range_is_fixed() {
        let pacing = Pacing::new(&PacingConfig::default());
        assert_eq!(
            pacing.sample(DelayRange::new(250, 250)),
            Duration::from_millis(250)
        );
    }
}

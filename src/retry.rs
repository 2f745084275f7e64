//! Bounded retry with increasing backoff.
//!
//! Navigation, login, and modal capture all share this one combinator rather
//! than carrying their own retry loops.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * attempt` before the next try, so waits grow with failures.
    Linear(Duration),
}

impl Backoff {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Linear(base) => base.saturating_mul(attempt),
        }
    }
}

/// Runs `op` up to `max_attempts` times, sleeping per `backoff` between
/// attempts. The attempt number (1-based) is passed to `op` for logging.
///
/// `is_terminal` short-circuits the budget: a terminal error is returned
/// immediately because retrying cannot change it.
pub async fn retry<T, E, F, Fut, P>(
    label: &str,
    max_attempts: u32,
    backoff: Backoff,
    is_terminal: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_terminal(&err) => return Err(err),
            Err(err) if attempt >= max_attempts => {
                warn!(%err, attempt, max_attempts, "{label}: giving up");
                return Err(err);
            }
            Err(err) => {
                let delay = backoff.delay_for(attempt);
                warn!(%err, attempt, max_attempts, delay_ms = delay.as_millis() as u64, "{label}: retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

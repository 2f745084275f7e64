//! Runtime configuration assembled from the environment.
//!
//! Every knob is environment-provided (a `.env` file is loaded in `main`
//! before this module runs). `Config::from_env` validates eagerly so a
//! misconfigured instance fails at startup instead of mid-cycle.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::scheduler::Parity;

pub const DEFAULT_KEY_PREFIX: &str = "gigwatch:jobs:";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_RECORD_TTL_SECS: u64 = 600;
pub const DEFAULT_LOGIN_PATH: &str = "/ab/account-security/login";
pub const DEFAULT_JOBS_PATH: &str = "/nx/find-work/best-matches";
pub const DEFAULT_TIMEOUT_MS: u64 = 45_000;
pub const DEFAULT_NAV_TIMEOUT_MS: u64 = 90_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:3000";

/// Pinned desktop UA; the headless default would leak automation hints.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
    #[error("invalid URL in {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Inclusive millisecond range used for randomized pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

impl FromStr for DelayRange {
    type Err = ();

    /// Parses `"MIN,MAX"`; a single number means a fixed delay.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ',').map(str::trim);
        let min_ms: u64 = parts.next().ok_or(())?.parse().map_err(|_| ())?;
        let max_ms: u64 = match parts.next() {
            Some(raw) => raw.parse().map_err(|_| ())?,
            None => min_ms,
        };
        if max_ms < min_ms {
            return Err(());
        }
        Ok(Self { min_ms, max_ms })
    }
}

/// Login identity for the target site.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub secret: String,
}

/// Target-site endpoints and identity.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub base_url: Url,
    pub login_url: Url,
    pub jobs_url: Url,
    /// Absent credentials fail at login time, not at startup, so read-only
    /// commands keep working.
    pub credentials: Option<Credentials>,
}

/// External store connection and batching policy.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub key_prefix: String,
    pub batch_size: usize,
    pub record_ttl_secs: u64,
}

/// Browser runtime knobs.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub default_timeout: Duration,
    pub nav_timeout: Duration,
    pub user_agent: String,
    /// Persistent profile directory; `None` launches an ephemeral profile.
    pub profile_dir: Option<PathBuf>,
}

/// Shared retry budget for navigation and login.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// Randomized wait ranges between pipeline phases.
#[derive(Debug, Clone, Copy)]
pub struct PacingConfig {
    /// Between consecutive job captures.
    pub job_delay: DelayRange,
    /// Between traversal cycles.
    pub refresh_delay: DelayRange,
    /// Settle time after navigation for challenge interstitials.
    pub challenge_wait: DelayRange,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            job_delay: DelayRange::new(4_000, 9_000),
            refresh_delay: DelayRange::new(5_000, 10_000),
            challenge_wait: DelayRange::new(2_000, 4_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub site: SiteConfig,
    pub store: StoreConfig,
    pub browser: BrowserSettings,
    pub retry: RetryConfig,
    pub pacing: PacingConfig,
    pub parity: Parity,
    pub health_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_raw =
            env_opt("GIGWATCH_BASE_URL").ok_or(ConfigError::MissingVar("GIGWATCH_BASE_URL"))?;
        let base_url = Url::parse(&base_raw).map_err(|source| ConfigError::InvalidUrl {
            name: "GIGWATCH_BASE_URL",
            source,
        })?;
        let login_path = env_opt("GIGWATCH_LOGIN_PATH").unwrap_or_else(|| DEFAULT_LOGIN_PATH.into());
        let jobs_path = env_opt("GIGWATCH_JOBS_PATH").unwrap_or_else(|| DEFAULT_JOBS_PATH.into());
        let login_url = base_url
            .join(&login_path)
            .map_err(|source| ConfigError::InvalidUrl {
                name: "GIGWATCH_LOGIN_PATH",
                source,
            })?;
        let jobs_url = base_url
            .join(&jobs_path)
            .map_err(|source| ConfigError::InvalidUrl {
                name: "GIGWATCH_JOBS_PATH",
                source,
            })?;

        let credentials = match (env_opt("GIGWATCH_LOGIN_USER"), env_opt("GIGWATCH_LOGIN_SECRET")) {
            (Some(user), Some(secret)) => Some(Credentials { user, secret }),
            _ => None,
        };

        let parity = match env_opt("GIGWATCH_INSTANCE_PARITY") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
                name: "GIGWATCH_INSTANCE_PARITY",
                value: raw,
            })?,
            None => Parity::Even,
        };

        let health_addr_raw =
            env_opt("GIGWATCH_HEALTH_ADDR").unwrap_or_else(|| DEFAULT_HEALTH_ADDR.into());
        let health_addr = health_addr_raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar {
                name: "GIGWATCH_HEALTH_ADDR",
                value: health_addr_raw,
            })?;

        Ok(Self {
            site: SiteConfig {
                base_url,
                login_url,
                jobs_url,
                credentials,
            },
            store: StoreConfig {
                url: redis_url_from_env(),
                key_prefix: env_opt("GIGWATCH_KEY_PREFIX")
                    .unwrap_or_else(|| DEFAULT_KEY_PREFIX.into()),
                batch_size: env_parse("GIGWATCH_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
                record_ttl_secs: env_parse("GIGWATCH_RECORD_TTL_SECS", DEFAULT_RECORD_TTL_SECS)?,
            },
            browser: BrowserSettings {
                headless: env_parse("GIGWATCH_HEADLESS", true)?,
                default_timeout: Duration::from_millis(env_parse(
                    "GIGWATCH_DEFAULT_TIMEOUT_MS",
                    DEFAULT_TIMEOUT_MS,
                )?),
                nav_timeout: Duration::from_millis(env_parse(
                    "GIGWATCH_NAV_TIMEOUT_MS",
                    DEFAULT_NAV_TIMEOUT_MS,
                )?),
                user_agent: env_opt("GIGWATCH_USER_AGENT")
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.into()),
                profile_dir: env_opt("GIGWATCH_PROFILE_DIR").map(PathBuf::from),
            },
            retry: RetryConfig {
                max_attempts: env_parse("GIGWATCH_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
                base_delay: Duration::from_millis(env_parse(
                    "GIGWATCH_RETRY_DELAY_MS",
                    DEFAULT_RETRY_DELAY_MS,
                )?),
            },
            pacing: PacingConfig {
                job_delay: env_parse("GIGWATCH_JOB_DELAY_MS", DelayRange::new(4_000, 9_000))?,
                refresh_delay: env_parse(
                    "GIGWATCH_REFRESH_DELAY_MS",
                    DelayRange::new(5_000, 10_000),
                )?,
                challenge_wait: env_parse(
                    "GIGWATCH_CHALLENGE_WAIT_MS",
                    DelayRange::new(2_000, 4_000),
                )?,
            },
            parity,
            health_addr,
        })
    }

    /// Credentials or a startup-quality error for commands that must log in.
    pub fn require_credentials(&self) -> Result<&Credentials, ConfigError> {
        self.site
            .credentials
            .as_ref()
            .ok_or(ConfigError::MissingVar("GIGWATCH_LOGIN_USER/GIGWATCH_LOGIN_SECRET"))
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
        None => Ok(default),
    }
}

/// `REDIS_URL` wins; otherwise the URL is assembled from split host/port/
/// password variables so existing deployments keep working.
fn redis_url_from_env() -> String {
    if let Some(url) = env_opt("REDIS_URL") {
        return url;
    }
    let host = env_opt("REDIS_HOST").unwrap_or_else(|| "127.0.0.1".into());
    let port = env_opt("REDIS_PORT").unwrap_or_else(|| "6379".into());
    match env_opt("REDIS_PASSWORD") {
        Some(password) => format!("redis://:{}@{}:{}", password, host, port),
        None => format!("redis://{}:{}", host, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_range_parses_pair() {
        let range: DelayRange = "4000,9000".parse().unwrap();
        assert_eq!(range, DelayRange::new(4_000, 9_000));
    }

    #[test]
    fn delay_range_parses_single_value_as_fixed() {
        let range: DelayRange = "2500".parse().unwrap();
        assert_eq!(range, DelayRange::new(2_500, 2_500));
    }

    #[test]
    fn delay_range_rejects_inverted_bounds() {
        assert!("9000,4000".parse::<DelayRange>().is_err());
        assert!("abc,123".parse::<DelayRange>().is_err());
    }
}

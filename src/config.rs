use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

use crate::release::DEFAULT_BASE_URL;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: usize = 3;
const DEFAULT_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How the report is fetched. Read from `PPR_REFRESH_*` environment
/// variables.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Extra attempts after the first, for transient failures only.
    pub retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub user_agent: String,
}

impl FetchConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url =
            std::env::var("PPR_REFRESH_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let timeout_secs = env_number("PPR_REFRESH_HTTP_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let retries = env_number("PPR_REFRESH_RETRIES", DEFAULT_RETRIES)?;
        let backoff_ms = env_number("PPR_REFRESH_BACKOFF_MS", DEFAULT_BACKOFF_MS)?;
        let user_agent = std::env::var("PPR_REFRESH_USER_AGENT")
            .unwrap_or_else(|_| format!("ppr-refresh/{}", env!("CARGO_PKG_VERSION")));

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            retries,
            initial_backoff: Duration::from_millis(backoff_ms),
            max_backoff: MAX_BACKOFF,
            user_agent,
        })
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16) as u32).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            max_backoff: MAX_BACKOFF,
            user_agent: format!("ppr-refresh/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn env_number<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("parse {name}={raw:?}")),
        _ => Ok(default),
    }
}

/// Where and how the published document is written.
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub html: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub dry_run: bool,
}

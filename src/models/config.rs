//! Application configuration structures.

use std::fs;
use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Direction;

/// Environment variable that overrides `notifier.webhook_url`.
pub const WEBHOOK_ENV: &str = "DISCORD_WEBHOOK_URL";

/// Longest fetch window, in days.
pub const MAX_DAYS: u32 = 31;

/// Longest pause between daemon checks: one week.
pub const MAX_CHECK_INTERVAL_MINS: u64 = 7 * 24 * 60;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream schedule endpoints and HTTP behavior
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// What to watch and when
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Webhook delivery settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(AppError::validation("fetcher.timeout_secs must be > 0"));
        }
        for url in [
            &self.fetcher.departure_url,
            &self.fetcher.arrival_url,
            &self.fetcher.departure_fallback_url,
            &self.fetcher.arrival_fallback_url,
        ] {
            url::Url::parse(url)
                .map_err(|e| AppError::validation(format!("invalid fetcher url '{url}': {e}")))?;
        }
        if self.schedule.airport.trim().is_empty() {
            return Err(AppError::validation("schedule.airport is empty"));
        }
        if self.schedule.days == 0 || self.schedule.days > MAX_DAYS {
            return Err(AppError::validation(format!(
                "schedule.days must be between 1 and {MAX_DAYS}"
            )));
        }
        if self.schedule.directions.is_empty() {
            return Err(AppError::validation("schedule.directions is empty"));
        }
        if self.schedule.check_interval_mins == 0
            || self.schedule.check_interval_mins > MAX_CHECK_INTERVAL_MINS
        {
            return Err(AppError::validation(format!(
                "schedule.check_interval_mins must be between 1 and {MAX_CHECK_INTERVAL_MINS}"
            )));
        }
        self.schedule.daily_time()?;
        if self.notifier.timeout_secs == 0 {
            return Err(AppError::validation("notifier.timeout_secs must be > 0"));
        }
        if self.notifier.max_description_chars == 0 {
            return Err(AppError::validation(
                "notifier.max_description_chars must be > 0",
            ));
        }
        Ok(())
    }

    /// Webhook URL, preferring the environment over the file.
    pub fn webhook_url(&self) -> Option<String> {
        std::env::var(WEBHOOK_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.notifier.webhook_url.clone())
    }
}

/// HTTP client and upstream endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    #[serde(default = "defaults::referer")]
    pub referer: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Pause between successive per-date requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    #[serde(default = "defaults::departure_url")]
    pub departure_url: String,

    #[serde(default = "defaults::arrival_url")]
    pub arrival_url: String,

    /// Page retried when the departure endpoint reports no data
    #[serde(default = "defaults::departure_fallback_url")]
    pub departure_fallback_url: String,

    /// Page retried when the arrival endpoint reports no data
    #[serde(default = "defaults::arrival_fallback_url")]
    pub arrival_fallback_url: String,

    #[serde(default = "defaults::site_id")]
    pub site_id: String,

    #[serde(default = "defaults::lang")]
    pub lang: String,
}

impl FetcherConfig {
    pub fn endpoint(&self, direction: Direction) -> &str {
        match direction {
            Direction::Departure => &self.departure_url,
            Direction::Arrival => &self.arrival_url,
        }
    }

    pub fn fallback_endpoint(&self, direction: Direction) -> &str {
        match direction {
            Direction::Departure => &self.departure_fallback_url,
            Direction::Arrival => &self.arrival_fallback_url,
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            referer: defaults::referer(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            departure_url: defaults::departure_url(),
            arrival_url: defaults::arrival_url(),
            departure_fallback_url: defaults::departure_fallback_url(),
            arrival_fallback_url: defaults::arrival_fallback_url(),
            site_id: defaults::site_id(),
            lang: defaults::lang(),
        }
    }
}

/// Watched airport, window and trigger times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Counterpart airport code
    #[serde(default = "defaults::airport")]
    pub airport: String,

    /// Number of days fetched, starting today
    #[serde(default = "defaults::days")]
    pub days: u32,

    #[serde(default = "defaults::directions")]
    pub directions: Vec<Direction>,

    /// Local time of the daily full listing, `HH:MM`
    #[serde(default = "defaults::daily_at")]
    pub daily_at: String,

    /// Minutes between diff checks in daemon mode
    #[serde(default = "defaults::check_interval")]
    pub check_interval_mins: u64,
}

impl ScheduleConfig {
    /// Parse `daily_at`.
    pub fn daily_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.daily_at.trim(), "%H:%M").map_err(|e| {
            AppError::validation(format!(
                "schedule.daily_at '{}' is not HH:MM: {e}",
                self.daily_at
            ))
        })
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            airport: defaults::airport(),
            days: defaults::days(),
            directions: defaults::directions(),
            daily_at: defaults::daily_at(),
            check_interval_mins: defaults::check_interval(),
        }
    }
}

/// Webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Discord webhook URL; `DISCORD_WEBHOOK_URL` takes precedence
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "defaults::notifier_timeout")]
    pub timeout_secs: u64,

    /// Embed description cap (Discord allows 4096)
    #[serde(default = "defaults::max_description_chars")]
    pub max_description_chars: usize,

    /// Optional display name override for the webhook
    #[serde(default)]
    pub username: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: defaults::notifier_timeout(),
            max_description_chars: defaults::max_description_chars(),
            username: None,
        }
    }
}

/// Snapshot cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Cache directory, relative to the storage dir unless absolute
    #[serde(default = "defaults::cache_dir")]
    pub cache_dir: String,

    /// Age after which a lock file is considered abandoned
    #[serde(default = "defaults::lock_stale")]
    pub lock_stale_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: defaults::cache_dir(),
            lock_stale_secs: defaults::lock_stale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when `--verbose` is not given
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use crate::models::Direction;

    // Fetcher defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into()
    }
    pub fn accept_language() -> String {
        "ja,en-US;q=0.7,en;q=0.3".into()
    }
    pub fn referer() -> String {
        "https://www.airport.kr/".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        2000
    }
    pub fn departure_url() -> String {
        "https://www.airport.kr/depCargo/ap_ja/depCargoSchList.do".into()
    }
    pub fn arrival_url() -> String {
        "https://www.airport.kr/arrCargo/ap_ja/arrCargoSchList.do".into()
    }
    pub fn departure_fallback_url() -> String {
        "https://www.airport.kr/ap_ja/1787/subview.do".into()
    }
    pub fn arrival_fallback_url() -> String {
        "https://www.airport.kr/ap_ja/1790/subview.do".into()
    }
    pub fn site_id() -> String {
        "ap_ja".into()
    }
    pub fn lang() -> String {
        "ja".into()
    }

    // Schedule defaults
    pub fn airport() -> String {
        "NGO".into()
    }
    pub fn days() -> u32 {
        7
    }
    pub fn directions() -> Vec<Direction> {
        Direction::ALL.to_vec()
    }
    pub fn daily_at() -> String {
        "22:00".into()
    }
    pub fn check_interval() -> u64 {
        60
    }

    // Notifier defaults
    pub fn notifier_timeout() -> u64 {
        10
    }
    pub fn max_description_chars() -> usize {
        1900
    }

    // Storage defaults
    pub fn cache_dir() -> String {
        "cache".into()
    }
    pub fn lock_stale() -> u64 {
        900
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

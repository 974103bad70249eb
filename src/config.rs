use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::errors::ConfigError;
use crate::services::resolver::UnknownTeamPolicy;

pub const DEFAULT_BASE_URL: &str = "https://www.procyclingstats.com";

const DEFAULT_USER_AGENT: &str = "pcs-scraper/0.1";

/// Overall scrape deadline when none is configured (20 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 1200;

const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Race start times are published in Central European Time.
const DEFAULT_EVENT_UTC_OFFSET_MINUTES: i32 = 60;

/// Operational parameters for one scrape run, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub season: i32,
    /// Root directory of the document cache. No caching when unset.
    pub cache_dir: Option<PathBuf>,
    pub skip_cache: bool,
    /// Deadline for the whole run (all phases).
    pub scrape_timeout: Duration,
    /// Wait between attempts of a failed fetch.
    pub retry_delay: Duration,
    pub base_url: String,
    pub user_agent: String,
    /// Fixed offset of the timezone stage start times are given in.
    pub event_offset: FixedOffset,
    pub unknown_team_policy: UnknownTeamPolicy,
}

impl ScrapeConfig {
    /// Defaults for everything except the season.
    pub fn new(season: i32) -> Self {
        Self {
            season,
            cache_dir: None,
            skip_cache: false,
            scrape_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            event_offset: FixedOffset::east_opt(DEFAULT_EVENT_UTC_OFFSET_MINUTES * 60)
                .unwrap_or_else(|| Utc.fix()),
            unknown_team_policy: UnknownTeamPolicy::Fail,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let season = std::env::var("SCRAPER_SEASON")
            .map_err(|_| ConfigError::Missing("SCRAPER_SEASON"))
            .and_then(|v| parse_var("SCRAPER_SEASON", &v))?;

        let mut config = Self::new(season);

        config.cache_dir = std::env::var("SCRAPER_CACHE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        if let Ok(v) = std::env::var("SCRAPER_SKIP_CACHE") {
            config.skip_cache = parse_var("SCRAPER_SKIP_CACHE", &v)?;
        }
        if let Ok(v) = std::env::var("SCRAPER_TIMEOUT_SECS") {
            config.scrape_timeout = Duration::from_secs(parse_var("SCRAPER_TIMEOUT_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("SCRAPER_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(parse_var("SCRAPER_RETRY_DELAY_MS", &v)?);
        }
        if let Ok(v) = std::env::var("SCRAPER_BASE_URL") {
            config.base_url = v;
        }
        if let Ok(v) = std::env::var("SCRAPER_USER_AGENT") {
            config.user_agent = v;
        }
        if let Ok(v) = std::env::var("SCRAPER_EVENT_UTC_OFFSET_MINUTES") {
            let minutes: i32 = parse_var("SCRAPER_EVENT_UTC_OFFSET_MINUTES", &v)?;
            config.event_offset =
                FixedOffset::east_opt(minutes * 60).ok_or(ConfigError::Invalid {
                    name: "SCRAPER_EVENT_UTC_OFFSET_MINUTES",
                    value: v,
                })?;
        }
        if let Ok(v) = std::env::var("SCRAPER_UNKNOWN_TEAM_POLICY") {
            config.unknown_team_policy = parse_var("SCRAPER_UNKNOWN_TEAM_POLICY", &v)?;
        }

        Ok(config)
    }

    /// Whether cached documents are served. Fetched pages are still written
    /// to `cache_dir` when `skip_cache` is set.
    pub fn reads_from_cache(&self) -> bool {
        self.cache_dir.is_some() && !self.skip_cache
    }
}

fn parse_var<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

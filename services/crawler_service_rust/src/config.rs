use anyhow::{anyhow, Context, Result};
use esports_rust_core::crawl::{CrawlConfig, EntryPoint};
use esports_rust_core::fetch::FetchConfig;
use esports_rust_core::models::DEFAULT_SPORT;
use esports_rust_core::normalize::{DEFAULT_BASE_URL, DEFAULT_NEWS_BASE_URL};
use esports_rust_core::reconcile::{EngineConfig, StatusPolicy};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Unset only in dry-run mode
    pub database_url: Option<String>,
    /// Keep everything in memory instead of Postgres
    pub dry_run: bool,

    pub base_url: String,
    pub news_base_url: String,
    pub extractor_url: String,
    pub extractor_timeout: Duration,
    pub sport: String,

    pub engine: EngineConfig,
    pub fetch: FetchConfig,
    pub crawl: CrawlConfig,

    /// Run one entry point and exit
    pub run_once: Option<EntryPoint>,
    /// Scheduler interval per entry point; zero disables it
    pub intervals: BTreeMap<EntryPoint, Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dry_run = parse_bool_env("CRAWL_DRY_RUN", false);
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty());
        if database_url.is_none() && !dry_run {
            return Err(anyhow!("DATABASE_URL must be set (or CRAWL_DRY_RUN=true)"));
        }

        let base_url = env::var("CRAWL_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let news_base_url =
            env::var("CRAWL_NEWS_BASE_URL").unwrap_or_else(|_| DEFAULT_NEWS_BASE_URL.to_string());
        let extractor_url = env::var("EXTRACTOR_URL")
            .unwrap_or_else(|_| "http://localhost:8050/extract".to_string());
        let extractor_timeout = Duration::from_secs(
            parse_u64_env("EXTRACTOR_TIMEOUT_SECS", 60).context("EXTRACTOR_TIMEOUT_SECS")?,
        );
        let sport = env::var("CRAWL_SPORT").unwrap_or_else(|_| DEFAULT_SPORT.to_string());

        let status_policy = match env::var("CRAWL_STATUS_POLICY") {
            Ok(raw) => raw
                .parse::<StatusPolicy>()
                .map_err(|e| anyhow!("Invalid CRAWL_STATUS_POLICY: {e}"))?,
            Err(_) => StatusPolicy::default(),
        };
        let engine = EngineConfig {
            status_policy,
            ..EngineConfig::default()
        };

        let run_once = match env::var("CRAWL_RUN_ONCE") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.parse::<EntryPoint>()
                    .map_err(|e| anyhow!("Invalid CRAWL_RUN_ONCE: {e}"))?,
            ),
            _ => None,
        };

        let mut intervals = BTreeMap::new();
        for entry in EntryPoint::all() {
            let key = interval_key(entry);
            let secs = parse_u64_env(&key, default_interval_secs(entry)).context(key)?;
            intervals.insert(entry, Duration::from_secs(secs));
        }

        Ok(Self {
            database_url,
            dry_run,
            crawl: CrawlConfig::from_env(&base_url, &news_base_url),
            base_url,
            news_base_url,
            extractor_url,
            extractor_timeout,
            sport,
            engine,
            fetch: FetchConfig::from_env(),
            run_once,
            intervals,
        })
    }
}

/// `CRAWL_<ENTRY>_INTERVAL_SECS`
pub fn interval_key(entry: EntryPoint) -> String {
    format!("CRAWL_{}_INTERVAL_SECS", entry.as_str().to_uppercase())
}

fn default_interval_secs(entry: EntryPoint) -> u64 {
    match entry {
        EntryPoint::UpdateLiveMatches => 120,
        EntryPoint::CreateMatches => 600,
        EntryPoint::MatchesWithTournaments => 900,
        EntryPoint::UpdateTournaments => 1_800,
        EntryPoint::PastMatches | EntryPoint::News => 3_600,
        EntryPoint::Teams | EntryPoint::Players => 86_400,
    }
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
        .unwrap_or(default)
}

fn parse_u64_env(key: &str, default: u64) -> Result<u64> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid {key}: {raw} (expected integer)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_keys() {
        assert_eq!(
            interval_key(EntryPoint::UpdateLiveMatches),
            "CRAWL_UPDATE_LIVE_MATCHES_INTERVAL_SECS"
        );
        assert_eq!(interval_key(EntryPoint::News), "CRAWL_NEWS_INTERVAL_SECS");
    }

    #[test]
    fn test_live_matches_poll_most_often() {
        let live = default_interval_secs(EntryPoint::UpdateLiveMatches);
        assert!(EntryPoint::all()
            .into_iter()
            .all(|entry| default_interval_secs(entry) >= live));
    }
}

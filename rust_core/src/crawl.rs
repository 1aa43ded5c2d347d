//! Crawl passes.
//!
//! Each entry point is one pass over a bounded set of pages: fetch, extract,
//! normalize, reconcile. Pages are processed with bounded concurrency and a
//! failing page or record only shows up in the pass report.

use crate::db::PersistenceGateway;
use crate::extract::{Extraction, Extractor, PageKind};
use crate::fetch::PageFetcher;
use crate::identity::match_key;
use crate::models::{RawRecord, RawValue, Record, RecordKind, TournamentInfo, TournamentRecord};
use crate::normalize::Normalizer;
use crate::placeholder::TournamentRunCache;
use crate::reconcile::{EngineConfig, ReconcileError, ReconciliationEngine, RecordOutcome, RunContext};
use crate::utils::text::resolve_url;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

// ============================================================================
// Entry points
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryPoint {
    /// Listing rows of scheduled and live matches
    CreateMatches,
    /// Re-poll match pages of stored scheduled/live matches
    UpdateLiveMatches,
    /// Backfill tournaments of matches stored without one
    UpdateTournaments,
    /// Match pages from the listings, then their tournament pages
    MatchesWithTournaments,
    PastMatches,
    Teams,
    Players,
    News,
}

impl EntryPoint {
    pub fn all() -> [EntryPoint; 8] {
        [
            EntryPoint::CreateMatches,
            EntryPoint::UpdateLiveMatches,
            EntryPoint::UpdateTournaments,
            EntryPoint::MatchesWithTournaments,
            EntryPoint::PastMatches,
            EntryPoint::Teams,
            EntryPoint::Players,
            EntryPoint::News,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::CreateMatches => "create_matches",
            EntryPoint::UpdateLiveMatches => "update_live_matches",
            EntryPoint::UpdateTournaments => "update_tournaments",
            EntryPoint::MatchesWithTournaments => "matches_with_tournaments",
            EntryPoint::PastMatches => "past_matches",
            EntryPoint::Teams => "teams",
            EntryPoint::Players => "players",
            EntryPoint::News => "news",
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        EntryPoint::all()
            .into_iter()
            .find(|entry| entry.as_str() == wanted)
            .ok_or_else(|| format!("unknown entry point: {}", s))
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Pages (and records) in flight per pass
    pub concurrency: usize,
    pub match_listing_pages: Vec<String>,
    pub past_match_pages: Vec<String>,
    pub team_listing_pages: Vec<String>,
    pub player_listing_pages: Vec<String>,
    pub news_archive_urls: Vec<String>,
    /// Cap on detail pages followed by the team and player passes
    pub max_follow_pages: usize,
}

impl CrawlConfig {
    /// Defaults for the given site roots.
    pub fn for_sites(base_url: &str, news_base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let news_base = news_base_url.trim_end_matches('/');
        let now = chrono::Utc::now();
        Self {
            concurrency: 8,
            match_listing_pages: (1..=2)
                .map(|page| format!("{}/en/csgo/matches?s1={}", base, page))
                .collect(),
            past_match_pages: (1..=2)
                .map(|page| format!("{}/en/csgo/matches?s2={}", base, page))
                .collect(),
            team_listing_pages: vec![format!("{}/en/csgo/team", base)],
            player_listing_pages: vec![format!("{}/en/csgo/player", base)],
            news_archive_urls: vec![format!(
                "{}/news/archive/{}/{}",
                news_base,
                now.format("%Y"),
                now.format("%B").to_string().to_lowercase()
            )],
            max_follow_pages: 500,
        }
    }

    pub fn from_env(base_url: &str, news_base_url: &str) -> Self {
        let defaults = Self::for_sites(base_url, news_base_url);
        Self {
            concurrency: std::env::var("CRAWL_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.concurrency),
            match_listing_pages: env_list("CRAWL_MATCH_LISTING_PAGES").unwrap_or(defaults.match_listing_pages),
            past_match_pages: env_list("CRAWL_PAST_MATCH_PAGES").unwrap_or(defaults.past_match_pages),
            team_listing_pages: env_list("CRAWL_TEAM_LISTING_PAGES").unwrap_or(defaults.team_listing_pages),
            player_listing_pages: env_list("CRAWL_PLAYER_LISTING_PAGES").unwrap_or(defaults.player_listing_pages),
            news_archive_urls: env_list("CRAWL_NEWS_ARCHIVE_URLS").unwrap_or(defaults.news_archive_urls),
            max_follow_pages: std::env::var("CRAWL_MAX_FOLLOW_PAGES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_follow_pages),
        }
    }
}

/// Comma-separated list; unset or blank means "use the default".
fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

// ============================================================================
// Pass report
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Pages that could not be fetched or extracted; retried next pass
    pub fetch_errors: u64,
}

impl PassReport {
    pub fn record(&mut self, result: &Result<RecordOutcome, ReconcileError>) {
        self.processed += 1;
        match result {
            Ok(RecordOutcome::Created) => self.created += 1,
            Ok(RecordOutcome::Updated) => self.updated += 1,
            Ok(RecordOutcome::Unchanged) => self.unchanged += 1,
            Ok(RecordOutcome::Skipped(_)) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn absorb(&mut self, other: PassReport) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.fetch_errors += other.fetch_errors;
    }
}

/// Outcome of visiting a set of pages.
#[derive(Debug, Default)]
struct Visit {
    report: PassReport,
    records: Vec<Record>,
    links: Vec<String>,
}

impl Visit {
    fn absorb(&mut self, other: Visit) {
        self.report.absorb(other.report);
        self.records.extend(other.records);
        self.links.extend(other.links);
    }
}

// ============================================================================
// Crawler
// ============================================================================

pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    gateway: Arc<dyn PersistenceGateway>,
    normalizer: Normalizer,
    engine: ReconciliationEngine,
    config: CrawlConfig,
    sport_id: Option<i64>,
}

impl Crawler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn Extractor>,
        gateway: Arc<dyn PersistenceGateway>,
        normalizer: Normalizer,
        engine_config: EngineConfig,
        config: CrawlConfig,
        sport_id: Option<i64>,
    ) -> Self {
        Self {
            engine: ReconciliationEngine::new(gateway.clone(), engine_config),
            fetcher,
            extractor,
            gateway,
            normalizer,
            config,
            sport_id,
        }
    }

    /// Run one pass of `entry`. The tournament cache starts empty on every
    /// pass.
    pub async fn run(&self, entry: EntryPoint) -> PassReport {
        let ctx = RunContext::new(self.sport_id, Arc::new(TournamentRunCache::new()));
        let span = info_span!("crawl", entry = entry.as_str(), run_id = %ctx.run_id);
        async {
            info!("crawl pass started");
            let report = match entry {
                EntryPoint::CreateMatches => {
                    self.visit_all(&self.config.match_listing_pages, PageKind::MatchListing, &ctx)
                        .await
                        .report
                }
                EntryPoint::UpdateLiveMatches => self.update_live_matches(&ctx).await,
                EntryPoint::UpdateTournaments => self.update_tournaments(&ctx).await,
                EntryPoint::MatchesWithTournaments => self.matches_with_tournaments(&ctx).await,
                EntryPoint::PastMatches => {
                    self.visit_all(&self.config.past_match_pages, PageKind::PastMatchListing, &ctx)
                        .await
                        .report
                }
                EntryPoint::Teams => {
                    self.follow(&self.config.team_listing_pages, PageKind::TeamListing, PageKind::TeamPage, &ctx)
                        .await
                }
                EntryPoint::Players => {
                    self.follow(
                        &self.config.player_listing_pages,
                        PageKind::PlayerListing,
                        PageKind::PlayerPage,
                        &ctx,
                    )
                    .await
                }
                EntryPoint::News => self.news(&ctx).await,
            };
            let cache = ctx.tournaments.stats();
            info!(
                processed = report.processed,
                created = report.created,
                updated = report.updated,
                unchanged = report.unchanged,
                skipped = report.skipped,
                failed = report.failed,
                fetch_errors = report.fetch_errors,
                tournament_cache_hits = cache.hits,
                tournament_cache_misses = cache.misses,
                "crawl pass finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    // ------------------------------------------------------------------------
    // Page plumbing
    // ------------------------------------------------------------------------

    async fn fetch_extract(&self, url: &str, kind: PageKind) -> Option<Extraction> {
        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(url, kind = kind.as_str(), error = %e, "page skipped, retry next pass");
                return None;
            }
        };
        match self.extractor.extract(kind, &page).await {
            Ok(extraction) => Some(extraction),
            Err(e) => {
                warn!(url, kind = kind.as_str(), error = %e, "extraction failed, page skipped");
                None
            }
        }
    }

    async fn apply_raw(&self, raw: &RawRecord, ctx: &RunContext, visit: &mut Visit) {
        let record = self.normalizer.normalize(raw);
        let result = self.engine.apply(&record, ctx).await;
        if let Err(e) = &result {
            warn!(kind = raw.kind.as_str(), error = %e, "record failed");
        }
        visit.report.record(&result);
        visit.records.push(record);
    }

    /// Fetch one page and apply every record on it.
    async fn visit(&self, url: &str, kind: PageKind, ctx: &RunContext) -> Visit {
        let mut visit = Visit::default();
        let Some(extraction) = self.fetch_extract(url, kind).await else {
            visit.report.fetch_errors += 1;
            return visit;
        };
        for raw in &extraction.records {
            self.apply_raw(raw, ctx, &mut visit).await;
        }
        visit.links = extraction
            .links
            .iter()
            .filter_map(|link| resolve_url(url, link))
            .collect();
        visit
    }

    async fn visit_all(&self, urls: &[String], kind: PageKind, ctx: &RunContext) -> Visit {
        let pending: Vec<BoxFuture<'_, Visit>> = urls.iter().map(|url| self.visit(url, kind, ctx).boxed()).collect();
        let visits: Vec<Visit> = stream::iter(pending)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        let mut merged = Visit::default();
        for visit in visits {
            merged.absorb(visit);
        }
        merged
    }

    /// Listing pages, then the detail pages they link to and the detail
    /// pages those link to, up to `max_follow_pages`.
    async fn follow(&self, listings: &[String], listing: PageKind, detail: PageKind, ctx: &RunContext) -> PassReport {
        let start = self.visit_all(listings, listing, ctx).await;
        let mut report = start.report;
        let mut seen: BTreeSet<String> = listings.iter().cloned().collect();
        let mut frontier = start.links;

        while !frontier.is_empty() && seen.len() < self.config.max_follow_pages + listings.len() {
            let budget = self.config.max_follow_pages + listings.len() - seen.len();
            let batch: Vec<String> = frontier
                .drain(..)
                .filter(|link| seen.insert(link.clone()))
                .take(budget)
                .collect();
            if batch.is_empty() {
                break;
            }
            let visit = self.visit_all(&batch, detail, ctx).await;
            report.absorb(visit.report);
            frontier = visit.links;
        }
        report
    }

    // ------------------------------------------------------------------------
    // Passes
    // ------------------------------------------------------------------------

    async fn matches_with_tournaments(&self, ctx: &RunContext) -> PassReport {
        let listings = self
            .visit_all(&self.config.match_listing_pages, PageKind::MatchListing, ctx)
            .await;
        let mut report = listings.report;
        let pages: Vec<String> = dedup(listings.links);
        let matches = self.visit_all(&pages, PageKind::MatchPage, ctx).await;
        report.absorb(matches.report);
        report.absorb(self.backfill_from_pages(&matches.records, ctx).await);
        report
    }

    async fn update_live_matches(&self, ctx: &RunContext) -> PassReport {
        let targets = match self.gateway.active_matches(self.sport_id).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "could not select live matches");
                return PassReport::default();
            }
        };
        let urls: Vec<String> = targets.into_iter().map(|t| t.url).collect();
        info!(matches = urls.len(), "re-polling active matches");
        let matches = self.visit_all(&urls, PageKind::MatchPage, ctx).await;
        let mut report = matches.report;
        report.absorb(self.backfill_from_pages(&matches.records, ctx).await);
        report
    }

    async fn update_tournaments(&self, ctx: &RunContext) -> PassReport {
        let targets = match self.gateway.matches_missing_competition(self.sport_id).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "could not select matches missing a tournament");
                return PassReport::default();
            }
        };
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for target in targets {
            groups.entry(target.url).or_default().push(target.external_id);
        }
        info!(tournaments = groups.len(), "backfilling tournaments");
        self.resolve_tournaments(groups, ctx).await
    }

    async fn news(&self, ctx: &RunContext) -> PassReport {
        let archive = self
            .visit_all(&self.config.news_archive_urls, PageKind::NewsArchive, ctx)
            .await;
        let mut report = archive.report;
        let links = dedup(archive.links);
        let known: BTreeSet<String> = match self.gateway.known_news_urls(&links).await {
            Ok(known) => known.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "could not filter known articles");
                BTreeSet::new()
            }
        };
        let fresh: Vec<String> = links.into_iter().filter(|url| !known.contains(url)).collect();
        info!(articles = fresh.len(), known = known.len(), "fetching new articles");
        report.absorb(self.visit_all(&fresh, PageKind::NewsArticle, ctx).await.report);
        report
    }

    // ------------------------------------------------------------------------
    // Tournament backfill
    // ------------------------------------------------------------------------

    /// Matches whose page named a tournament page without inline details.
    async fn backfill_from_pages(&self, records: &[Record], ctx: &RunContext) -> PassReport {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for record in records {
            let Record::MatchPage(page) = record else {
                continue;
            };
            if page.tournament.is_some() {
                continue;
            }
            let (Some(url), Some(key)) = (
                page.tournament_url.as_ref(),
                page.match_url.as_deref().and_then(|u| match_key(u).resolved()),
            ) else {
                continue;
            };
            if ctx.tournaments.knows_page(url) {
                continue;
            }
            groups.entry(url.clone()).or_default().push(key.to_string());
        }
        self.resolve_tournaments(groups, ctx).await
    }

    /// Fetch each tournament page once and attach it to every match that
    /// references it. Pages already resolved in this run are not fetched.
    async fn resolve_tournaments(&self, groups: BTreeMap<String, Vec<String>>, ctx: &RunContext) -> PassReport {
        let pending: Vec<BoxFuture<'_, PassReport>> = groups
            .into_iter()
            .map(|(url, match_ids)| async move {
                let mut report = PassReport::default();
                let Some(info) = self.tournament_info(&url, ctx).await else {
                    report.fetch_errors += 1;
                    return report;
                };
                // Sequential so the first commit feeds the cache for the rest.
                for match_id in match_ids {
                    let record = Record::Tournament(TournamentRecord {
                        match_external_id: Some(match_id),
                        info: info.clone(),
                    });
                    let result = self.engine.apply(&record, ctx).await;
                    if let Err(e) = &result {
                        warn!(tournament = %url, error = %e, "tournament attach failed");
                    }
                    report.record(&result);
                }
                report
            }
            .boxed())
            .collect();
        let reports: Vec<PassReport> = stream::iter(pending)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        let mut merged = PassReport::default();
        for report in reports {
            merged.absorb(report);
        }
        merged
    }

    async fn tournament_info(&self, url: &str, ctx: &RunContext) -> Option<TournamentInfo> {
        if let Some((key, _)) = ctx.tournaments.competition_for_page(url) {
            return Some(TournamentInfo {
                name: Some(key.to_string()),
                page_url: Some(url.to_string()),
                ..Default::default()
            });
        }
        let extraction = self.fetch_extract(url, PageKind::TournamentPage).await?;
        let Some(mut raw) = extraction
            .records
            .into_iter()
            .find(|raw| raw.kind == RecordKind::Tournament)
        else {
            warn!(url, "tournament page without tournament record");
            return None;
        };
        raw.fields
            .0
            .entry("tournament_url".to_string())
            .or_insert_with(|| RawValue::Text(url.to_string()));
        match self.normalizer.normalize(&raw) {
            Record::Tournament(record) => Some(record.info),
            _ => None,
        }
    }
}

fn dedup(links: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    links.into_iter().filter(|link| seen.insert(link.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_names() {
        for entry in EntryPoint::all() {
            assert_eq!(entry.as_str().parse::<EntryPoint>(), Ok(entry));
        }
        assert_eq!("update-live-matches".parse(), Ok(EntryPoint::UpdateLiveMatches));
        assert!("everything".parse::<EntryPoint>().is_err());
    }

    #[test]
    fn test_default_pages() {
        let config = CrawlConfig::for_sites("https://escorenews.com/", "https://www.hltv.org");
        assert_eq!(config.match_listing_pages[0], "https://escorenews.com/en/csgo/matches?s1=1");
        assert_eq!(config.past_match_pages[1], "https://escorenews.com/en/csgo/matches?s2=2");
        assert!(config.news_archive_urls[0].starts_with("https://www.hltv.org/news/archive/"));
    }

    #[test]
    fn test_report_counts() {
        let mut report = PassReport::default();
        report.record(&Ok(RecordOutcome::Created));
        report.record(&Ok(RecordOutcome::Unchanged));
        report.record(&Err(ReconcileError::ConflictExhausted {
            kind: RecordKind::Team,
            key: "navi".into(),
            attempts: 3,
        }));
        let mut total = PassReport {
            fetch_errors: 1,
            ..Default::default()
        };
        total.absorb(report);
        assert_eq!(
            (total.processed, total.created, total.unchanged, total.failed, total.fetch_errors),
            (3, 1, 1, 1, 1)
        );
    }

    #[test]
    fn test_dedup_keeps_first_sighting_order() {
        assert_eq!(dedup(vec!["a".into(), "b".into(), "a".into()]), vec!["a".to_string(), "b".to_string()]);
    }
}

//! "TBD" participant detection and the run-scoped tournament cache.

use crate::identity::{team_key, Resolution, TeamKey, TournamentKey, Unresolved};
use crate::models::TeamSlot;
use crate::utils::text::JAVASCRIPT_VOID;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Team page the site links for a participant that is not decided yet.
const TBD_TEAM_PAGE_SUFFIX: &str = "/team/players";

/// Whether a slot's page link is one of the site's placeholder links.
pub fn is_placeholder_link(url: &str) -> bool {
    let url = url.trim().trim_end_matches('/');
    url == JAVASCRIPT_VOID || url.ends_with(TBD_TEAM_PAGE_SUFFIX)
}

/// Team key of a match slot. Placeholder links and "TBD" names never yield
/// a key, so a placeholder can never become a team row.
pub fn slot_team_key(slot: &TeamSlot) -> Resolution<TeamKey> {
    if slot.page_url.as_deref().is_some_and(is_placeholder_link) {
        return Resolution::Unresolved(Unresolved::Placeholder);
    }
    match slot.slug.as_deref().or(slot.pretty_name.as_deref()) {
        Some(name) => team_key(name),
        None => Resolution::Unresolved(Unresolved::Missing("team")),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub pages: usize,
    pub competitions: usize,
}

/// Tournaments resolved during one crawl run.
///
/// Tournament pages are tracked by URL and competitions by key so that the
/// matches sharing one tournament neither re-fetch its page nor re-create
/// its row. Entries are only added after the transaction that resolved them
/// committed.
#[derive(Debug, Default)]
pub struct TournamentRunCache {
    pages: RwLock<FxHashMap<String, TournamentKey>>,
    competitions: RwLock<FxHashMap<TournamentKey, i64>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TournamentRunCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn count(&self, found: bool) {
        let counter = if found { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Competition id for a tournament key.
    pub fn competition(&self, key: &TournamentKey) -> Option<i64> {
        let found = self.competitions.read().get(key).copied();
        self.count(found.is_some());
        found
    }

    /// Competition resolved from a tournament page URL.
    pub fn competition_for_page(&self, url: &str) -> Option<(TournamentKey, i64)> {
        let found = self.pages.read().get(url).and_then(|key| {
            self.competitions
                .read()
                .get(key)
                .map(|id| (key.clone(), *id))
        });
        self.count(found.is_some());
        found
    }

    /// Whether the page was already resolved. Does not count as a lookup.
    pub fn knows_page(&self, url: &str) -> bool {
        self.pages.read().contains_key(url)
    }

    pub fn remember(&self, key: TournamentKey, competition_id: i64, page_url: Option<&str>) {
        if let Some(url) = page_url {
            self.pages.write().insert(url.to_string(), key.clone());
        }
        self.competitions.write().insert(key, competition_id);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            pages: self.pages.read().len(),
            competitions: self.competitions.read().len(),
        }
    }
}

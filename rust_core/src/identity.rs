//! Natural-key resolution.
//!
//! Pure functions from normalized values to the keys used for upsert
//! matching. Nothing here touches storage, and nothing guesses: a value that
//! cannot yield a key comes back as [`Resolution::Unresolved`].

use crate::models::Record;
use crate::utils::text::last_path_segment;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Sentinel the site shows for a participant that is not known yet.
pub const TBD: &str = "TBD";

static MATCH_TEAMS_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn match_teams_re() -> Option<&'static Regex> {
    MATCH_TEAMS_RE
        .get_or_init(|| Regex::new(r"/([^/-]+(?:-[^/-]+)*)-vs-([^/-]+(?:-[^/-]+)*)-[0-9]+$").ok())
        .as_ref()
}

/// Why a value produced no key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Unresolved {
    /// The identifying field was absent or empty
    Missing(&'static str),
    /// The value is the "TBD" placeholder
    Placeholder,
    /// The value was present but has no usable key in it
    Malformed(String),
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::Missing(field) => write!(f, "missing {}", field),
            Unresolved::Placeholder => write!(f, "placeholder ({})", TBD),
            Unresolved::Malformed(value) => write!(f, "malformed key source {:?}", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resolution<K> {
    Resolved(K),
    Unresolved(Unresolved),
}

impl<K> Resolution<K> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    pub fn resolved(self) -> Option<K> {
        match self {
            Resolution::Resolved(key) => Some(key),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(K) -> U) -> Resolution<U> {
        match self {
            Resolution::Resolved(key) => Resolution::Resolved(f(key)),
            Resolution::Unresolved(reason) => Resolution::Unresolved(reason),
        }
    }
}

macro_rules! natural_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

natural_key!(
    /// Trailing numeric id of a match URL
    MatchKey
);
natural_key!(
    /// Lower-case, hyphenated team slug
    TeamKey
);
natural_key!(
    /// Tournament display name
    TournamentKey
);
natural_key!(
    /// Canonical player profile URL
    PlayerKey
);
natural_key!(
    /// Canonical article URL
    NewsKey
);

/// Primary key of any record, tagged by entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NaturalKey {
    Match(MatchKey),
    Team(TeamKey),
    Tournament(TournamentKey),
    Player(PlayerKey),
    News(NewsKey),
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Match(k) => write!(f, "match:{}", k),
            NaturalKey::Team(k) => write!(f, "team:{}", k),
            NaturalKey::Tournament(k) => write!(f, "tournament:{}", k),
            NaturalKey::Player(k) => write!(f, "player:{}", k),
            NaturalKey::News(k) => write!(f, "news:{}", k),
        }
    }
}

/// Trim, drop query string and fragment, drop trailing slashes.
pub fn canonical_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let without_fragment = raw.split('#').next().unwrap_or(raw);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let canonical = without_query.trim_end_matches('/');
    if canonical.is_empty() {
        None
    } else {
        Some(canonical.to_string())
    }
}

fn is_placeholder(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(TBD)
}

/// Stable match id from the trailing numeric segment of the match URL.
pub fn match_key(url: &str) -> Resolution<MatchKey> {
    let Some(canonical) = canonical_url(url) else {
        return Resolution::Unresolved(Unresolved::Missing("match_url"));
    };
    let Some(segment) = last_path_segment(&canonical) else {
        return Resolution::Unresolved(Unresolved::Malformed(canonical));
    };
    let tail = segment.rsplit('-').next().unwrap_or(&segment);
    if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
        Resolution::Resolved(MatchKey(tail.to_string()))
    } else {
        Resolution::Unresolved(Unresolved::Malformed(canonical))
    }
}

/// Match key from an already-extracted external id.
pub fn match_key_from_id(external_id: &str) -> Resolution<MatchKey> {
    let id = external_id.trim();
    if id.is_empty() {
        Resolution::Unresolved(Unresolved::Missing("external_id"))
    } else if id.chars().all(|c| c.is_ascii_digit()) {
        Resolution::Resolved(MatchKey(id.to_string()))
    } else {
        match_key(id)
    }
}

/// Team slug from a display name or slug. "TBD" never becomes a key.
pub fn team_key(name: &str) -> Resolution<TeamKey> {
    let name = name.trim();
    if name.is_empty() {
        return Resolution::Unresolved(Unresolved::Missing("team_name"));
    }
    if is_placeholder(name) {
        return Resolution::Unresolved(Unresolved::Placeholder);
    }
    let slug = name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    Resolution::Resolved(TeamKey(slug))
}

pub fn tournament_key(name: &str) -> Resolution<TournamentKey> {
    let name = name.trim();
    if name.is_empty() {
        Resolution::Unresolved(Unresolved::Missing("tournament_name"))
    } else if is_placeholder(name) {
        Resolution::Unresolved(Unresolved::Placeholder)
    } else {
        Resolution::Resolved(TournamentKey(name.to_string()))
    }
}

pub fn player_key(profile_url: &str) -> Resolution<PlayerKey> {
    match canonical_url(profile_url) {
        Some(url) => Resolution::Resolved(PlayerKey(url)),
        None => Resolution::Unresolved(Unresolved::Missing("team_member_url")),
    }
}

pub fn news_key(url: &str) -> Resolution<NewsKey> {
    match canonical_url(url) {
        Some(url) => Resolution::Resolved(NewsKey(url)),
        None => Resolution::Unresolved(Unresolved::Missing("url")),
    }
}

/// Split `.../<team1>-vs-<team2>-<id>` into the two team slugs.
pub fn teams_from_match_url(url: &str) -> Option<(String, String)> {
    let canonical = canonical_url(url)?;
    let caps = match_teams_re()?.captures(&canonical)?;
    Some((caps.get(1)?.as_str().to_string(), caps.get(2)?.as_str().to_string()))
}

/// Count of "tbd" occurrences in a listing URL. Two means neither participant
/// is known and the listing carries no identity worth storing.
pub fn placeholder_count(url: &str) -> usize {
    url.to_lowercase().matches("tbd").count()
}

fn optional<K>(value: Option<&str>, field: &'static str, f: fn(&str) -> Resolution<K>) -> Resolution<K> {
    match value {
        Some(v) => f(v),
        None => Resolution::Unresolved(Unresolved::Missing(field)),
    }
}

/// Primary natural key of a normalized record.
pub fn resolve(record: &Record) -> Resolution<NaturalKey> {
    match record {
        Record::MatchListing(r) => {
            if r.match_url.as_deref().is_some_and(|u| placeholder_count(u) >= 2) {
                return Resolution::Unresolved(Unresolved::Placeholder);
            }
            optional(r.match_url.as_deref(), "match_url", match_key).map(NaturalKey::Match)
        }
        Record::MatchPage(r) => optional(r.match_url.as_deref(), "match_url", match_key).map(NaturalKey::Match),
        Record::PastMatch(r) => match (&r.external_id, &r.match_url) {
            (Some(id), _) => match_key_from_id(id).map(NaturalKey::Match),
            (None, url) => optional(url.as_deref(), "match_url", match_key).map(NaturalKey::Match),
        },
        Record::Tournament(r) => {
            optional(r.match_external_id.as_deref(), "match_external_id", match_key_from_id)
                .map(NaturalKey::Match)
        }
        Record::Team(r) => {
            let slug = r.slug.clone().or_else(|| r.page_url.as_deref().and_then(last_path_segment));
            match slug.or_else(|| r.pretty_name.clone()) {
                Some(name) => team_key(&name).map(NaturalKey::Team),
                None => Resolution::Unresolved(Unresolved::Missing("team_name")),
            }
        }
        Record::Player(r) => optional(r.profile_url.as_deref(), "team_member_url", player_key).map(NaturalKey::Player),
        Record::News(r) => optional(r.url.as_deref(), "url", news_key).map(NaturalKey::News),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchListingRecord, NewsRecord, TeamRecord};

    #[test]
    fn test_match_key_from_url() {
        let url = "https://escorenews.com/en/csgo/matches/teamA-vs-teamB-12345";
        assert_eq!(match_key(url), Resolution::Resolved(MatchKey("12345".into())));
        // same URL, crawled again with noise around it
        assert_eq!(match_key(&format!(" {}/?ref=home ", url)), match_key(url));
    }

    #[test]
    fn test_match_key_rejects_non_numeric_tail() {
        assert!(!match_key("https://escorenews.com/en/csgo/matches/teamA-vs-teamB").is_resolved());
        assert_eq!(match_key(""), Resolution::Unresolved(Unresolved::Missing("match_url")));
    }

    #[test]
    fn test_match_key_from_id() {
        assert_eq!(match_key_from_id(" 987 ").resolved().unwrap().as_str(), "987");
        assert!(!match_key_from_id("").is_resolved());
    }

    #[test]
    fn test_team_key_normalization() {
        assert_eq!(team_key("Natus  Vincere").resolved().unwrap().as_str(), "natus-vincere");
        assert_eq!(team_key("natus-vincere").resolved().unwrap().as_str(), "natus-vincere");
    }

    #[test]
    fn test_team_key_never_resolves_tbd() {
        assert_eq!(team_key("TBD"), Resolution::Unresolved(Unresolved::Placeholder));
        assert_eq!(team_key(" tbd "), Resolution::Unresolved(Unresolved::Placeholder));
        assert_eq!(team_key(""), Resolution::Unresolved(Unresolved::Missing("team_name")));
    }

    #[test]
    fn test_player_key_is_canonical_url() {
        let a = player_key("https://escorenews.com/en/csgo/player/s1mple/");
        let b = player_key("https://escorenews.com/en/csgo/player/s1mple#stats");
        assert_eq!(a, b);
    }

    #[test]
    fn test_teams_from_match_url() {
        assert_eq!(
            teams_from_match_url("https://escorenews.com/en/csgo/matches/natus-vincere-vs-team-liquid-551"),
            Some(("natus-vincere".to_string(), "team-liquid".to_string()))
        );
        assert_eq!(teams_from_match_url("https://escorenews.com/en/csgo/matches/"), None);
    }

    #[test]
    fn test_resolve_listing_with_two_placeholders() {
        let record = Record::MatchListing(MatchListingRecord {
            match_url: Some("https://escorenews.com/en/csgo/matches/tbd-vs-tbd-77".into()),
            ..Default::default()
        });
        assert_eq!(resolve(&record), Resolution::Unresolved(Unresolved::Placeholder));
    }

    #[test]
    fn test_resolve_team_prefers_slug() {
        let record = Record::Team(TeamRecord {
            slug: None,
            pretty_name: Some("Astralis".into()),
            page_url: Some("https://escorenews.com/en/csgo/team/astralis".into()),
            ..Default::default()
        });
        assert_eq!(
            resolve(&record),
            Resolution::Resolved(NaturalKey::Team(TeamKey("astralis".into())))
        );
    }

    #[test]
    fn test_resolve_is_pure() {
        let record = Record::News(NewsRecord {
            url: Some("https://www.hltv.org/news/1/a".into()),
            ..Default::default()
        });
        assert_eq!(resolve(&record), resolve(&record));
    }
}

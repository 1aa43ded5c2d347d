//! Raw extracted fields and the typed records the normalizer produces.
//!
//! The extraction layer hands over loosely-shaped field maps; everything past
//! the normalizer works on the closed [`Record`] sum type instead.

use super::{Accomplishment, MatchStatusKind, StatusPayload, StreamInfo};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Raw input
// ============================================================================

/// Entity-type tag attached to every raw field map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Row from a scheduled/live match listing page
    MatchListing,
    /// Match detail page (teams, scores, streams, optional inline tournament)
    MatchPage,
    /// Row from the finished-matches listing
    PastMatch,
    /// Tournament page fetched for a match lacking one
    Tournament,
    Team,
    Player,
    News,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::MatchListing => "match_listing",
            RecordKind::MatchPage => "match_page",
            RecordKind::PastMatch => "past_match",
            RecordKind::Tournament => "tournament",
            RecordKind::Team => "team",
            RecordKind::Player => "player",
            RecordKind::News => "news",
        }
    }
}

/// A single extracted value. Selectors yield a string, a list of strings, or
/// a small table (e.g. roster: nickname -> [status, link, country, photo]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Text(String),
    List(Vec<String>),
    Table(BTreeMap<String, Vec<String>>),
    Map(BTreeMap<String, String>),
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawFields(pub BTreeMap<String, RawValue>);

impl RawFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), RawValue::Text(value.to_string()));
        self
    }

    pub fn with_list(mut self, name: &str, values: &[&str]) -> Self {
        self.0.insert(
            name.to_string(),
            RawValue::List(values.iter().map(|v| v.to_string()).collect()),
        );
        self
    }

    pub fn with_table(mut self, name: &str, rows: &[(&str, &[&str])]) -> Self {
        let table = rows
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect();
        self.0.insert(name.to_string(), RawValue::Table(table));
        self
    }

    /// First string value of a field. Lists yield their first element.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            RawValue::Text(s) => Some(s.as_str()),
            RawValue::List(items) => items.first().map(|s| s.as_str()),
            _ => None,
        }
    }

    /// All string values of a field. A text field is a one-element list.
    pub fn list(&self, name: &str) -> Vec<&str> {
        match self.0.get(name) {
            Some(RawValue::Text(s)) => vec![s.as_str()],
            Some(RawValue::List(items)) => items.iter().map(|s| s.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Table field as name -> columns. Plain maps become one-column rows.
    pub fn table(&self, name: &str) -> BTreeMap<String, Vec<String>> {
        match self.0.get(name) {
            Some(RawValue::Table(rows)) => rows.clone(),
            Some(RawValue::Map(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), vec![v.clone()]))
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Output of the extraction adapter for one entity on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub kind: RecordKind,
    #[serde(default)]
    pub fields: RawFields,
}

impl RawRecord {
    pub fn new(kind: RecordKind, fields: RawFields) -> Self {
        Self { kind, fields }
    }
}

// ============================================================================
// Normalized records
// ============================================================================

/// One participant slot on a match page. Every field is optional: a slot whose
/// name cannot be resolved is a "TBD" placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamSlot {
    /// URL slug, e.g. "natus-vincere"
    pub slug: Option<String>,
    pub pretty_name: Option<String>,
    pub page_url: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TournamentInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub prize_pool: Option<String>,
    pub location: Option<String>,
    pub start_date: Option<NaiveDateTime>,
    pub logo_url: Option<String>,
    pub page_url: Option<String>,
}

impl TournamentInfo {
    /// Whether anything beyond the name and page link is known.
    pub fn has_details(&self) -> bool {
        self.description.is_some()
            || self.prize_pool.is_some()
            || self.location.is_some()
            || self.start_date.is_some()
            || self.logo_url.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchListingRecord {
    pub match_url: Option<String>,
    pub match_name: Option<String>,
    pub planned_start: Option<NaiveDateTime>,
    pub status: Option<MatchStatusKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPageRecord {
    pub match_url: Option<String>,
    pub match_name: Option<String>,
    pub pretty_match_name: Option<String>,
    pub planned_start: Option<NaiveDateTime>,
    pub status: Option<MatchStatusKind>,
    pub payload: StatusPayload,
    pub teams: [TeamSlot; 2],
    pub streams: BTreeMap<String, StreamInfo>,
    pub tournament_url: Option<String>,
    /// Present when the page was crawled together with its tournament page
    pub tournament: Option<TournamentInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PastMatchRecord {
    pub match_url: Option<String>,
    pub external_id: Option<String>,
    pub match_name: Option<String>,
    pub date: Option<NaiveDateTime>,
    pub team1: Option<String>,
    pub team2: Option<String>,
    pub team1_score: Option<u32>,
    pub team2_score: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TournamentRecord {
    pub match_external_id: Option<String>,
    pub info: TournamentInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterEntry {
    pub nickname: Option<String>,
    pub status: String,
    pub profile_url: Option<String>,
    pub country: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamRecord {
    pub slug: Option<String>,
    pub pretty_name: Option<String>,
    pub page_url: Option<String>,
    pub logo_url: Option<String>,
    pub region: Option<String>,
    pub stats: BTreeMap<String, String>,
    pub regalia: BTreeMap<String, Accomplishment>,
    pub roster: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerRecord {
    pub profile_url: Option<String>,
    pub nickname: Option<String>,
    pub name: Option<String>,
    pub team_slug: Option<String>,
    pub team_url: Option<String>,
    pub age: Option<u32>,
    pub country: Option<String>,
    pub image_url: Option<String>,
    pub games_last_year: Option<String>,
    pub games_overall: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewsRecord {
    pub url: Option<String>,
    pub header: Option<String>,
    pub text: String,
    pub created_at: Option<NaiveDateTime>,
}

/// Closed schema of everything the reconciliation engine accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    MatchListing(MatchListingRecord),
    MatchPage(MatchPageRecord),
    PastMatch(PastMatchRecord),
    Tournament(TournamentRecord),
    Team(TeamRecord),
    Player(PlayerRecord),
    News(NewsRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::MatchListing(_) => RecordKind::MatchListing,
            Record::MatchPage(_) => RecordKind::MatchPage,
            Record::PastMatch(_) => RecordKind::PastMatch,
            Record::Tournament(_) => RecordKind::Tournament,
            Record::Team(_) => RecordKind::Team,
            Record::Player(_) => RecordKind::Player,
            Record::News(_) => RecordKind::News,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_deserializes_mixed_values() {
        let json = r#"{
            "kind": "team",
            "fields": {
                "team_name": "natus-vincere",
                "pretty_names": ["NAVI", "Natus Vincere"],
                "players": {"s1mple": ["active player", "/en/csgo/player/s1mple", "Ukraine", ""]},
                "stats": {"winstreak": "4"},
                "team_region": null
            }
        }"#;
        let raw: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(raw.kind, RecordKind::Team);
        assert_eq!(raw.fields.text("team_name"), Some("natus-vincere"));
        assert_eq!(raw.fields.text("pretty_names"), Some("NAVI"));
        assert_eq!(raw.fields.list("pretty_names").len(), 2);
        assert_eq!(raw.fields.table("players")["s1mple"][2], "Ukraine");
        assert_eq!(raw.fields.table("stats")["winstreak"], vec!["4".to_string()]);
        assert_eq!(raw.fields.text("team_region"), None);
        assert_eq!(raw.fields.text("absent"), None);
        assert!(raw.fields.list("absent").is_empty());
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let raw: RawRecord = serde_json::from_str(r#"{"kind": "news"}"#).unwrap();
        assert!(raw.fields.0.is_empty());
    }
}

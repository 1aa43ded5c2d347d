// Shared entity models for the esports crawl pipeline
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod record;

pub use record::*;

/// Sport every crawl pass is scoped to unless configured otherwise.
pub const DEFAULT_SPORT: &str = "CS2";

// ============================================================================
// Reference entities
// ============================================================================

/// Pre-seeded sport row. Looked up by name, never created by the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sport {
    pub sport_id: i64,
    pub name: String,
}

// ============================================================================
// Match & Match Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatusKind {
    Scheduled,
    Live,
    Finished,
}

impl MatchStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatusKind::Scheduled => "scheduled",
            MatchStatusKind::Live => "live",
            MatchStatusKind::Finished => "finished",
        }
    }

    /// Position in the scheduled -> live -> finished lifecycle
    pub fn rank(&self) -> u8 {
        match self {
            MatchStatusKind::Scheduled => 0,
            MatchStatusKind::Live => 1,
            MatchStatusKind::Finished => 2,
        }
    }

    /// Parse either a canonical name or one of the site's status banners.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "scheduled" | "Match did not start" | "Is the 3rd round" => Some(Self::Scheduled),
            "live" | "Match started" => Some(Self::Live),
            "finished" | "Match ends" => Some(Self::Finished),
            _ => None,
        }
    }
}

/// Mutable score/format part of a match status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub team1_score: Option<u32>,
    pub team2_score: Option<u32>,
    pub match_format: Option<String>,
}

/// Current status snapshot of a match. There is exactly one per match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStatus {
    pub name: MatchStatusKind,
    pub status: StatusPayload,
}

impl MatchStatus {
    pub fn new(name: MatchStatusKind) -> Self {
        Self {
            name,
            status: StatusPayload::default(),
        }
    }
}

/// One stream listed on a match page, keyed by stream name in `Match::streams`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub author: Option<String>,
    pub language: Option<String>,
    pub viewers: Option<u32>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub external_id: String,
    pub match_name: Option<String>,
    pub pretty_match_name: Option<String>,
    pub match_url: Option<String>,
    pub tournament_url: Option<String>,
    pub planned_start_datetime: Option<NaiveDateTime>,
    pub streams: BTreeMap<String, StreamInfo>,
    pub sport_id: Option<i64>,
    /// Set only through `Relation::MatchCompetition`.
    pub competition_id: Option<i64>,
}

// ============================================================================
// Teams, Players, Competitions
// ============================================================================

/// Tournament placement listed in a team's achievements table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accomplishment {
    pub place: Option<String>,
    pub earnings: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Slug, unique natural key
    pub name: String,
    pub pretty_name: Option<String>,
    pub team_url: Option<String>,
    pub image_url: Option<String>,
    pub region: Option<String>,
    pub stats: BTreeMap<String, String>,
    pub regalia: BTreeMap<String, Accomplishment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    /// Profile URL, unique natural key
    pub team_member_url: String,
    pub nickname: Option<String>,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub country: Option<String>,
    pub image_url: Option<String>,
    pub stats: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    /// Display name, unique natural key
    pub name: String,
    pub description: Option<String>,
    pub prize_pool: Option<String>,
    pub location: Option<String>,
    pub start_date: Option<NaiveDateTime>,
    pub image_url: Option<String>,
    pub sport_id: Option<i64>,
}

// ============================================================================
// News
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    New,
    Processed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::New => "new",
            PipelineStatus::Processed => "processed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "processed" => Some(Self::Processed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNews {
    pub url: String,
    pub header: Option<String>,
    pub text: String,
    pub news_creation_time: Option<NaiveDateTime>,
    pub sport_id: Option<i64>,
    pub pipeline_status: PipelineStatus,
    pub pipeline_update_time: Option<NaiveDateTime>,
}

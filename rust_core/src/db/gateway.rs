//! Persistence gateway: the transactional store the reconciliation engine
//! writes through.
//!
//! The engine only ever sees these traits. `PgGateway` backs them with
//! Postgres, `InMemoryGateway` with an in-process map.

use crate::models::{Competition, Match, MatchStatus, RawNews, Sport, Team, TeamMember};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Entities & keys
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Match,
    Team,
    TeamMember,
    Competition,
    RawNews,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Match => "match",
            EntityKind::Team => "team",
            EntityKind::TeamMember => "team_member",
            EntityKind::Competition => "competition",
            EntityKind::RawNews => "raw_news",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique column value an entity can be looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    MatchExternalId(String),
    TeamName(String),
    TeamUrl(String),
    CompetitionName(String),
    MemberUrl(String),
    NewsUrl(String),
}

impl EntityKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityKey::MatchExternalId(_) => EntityKind::Match,
            EntityKey::TeamName(_) | EntityKey::TeamUrl(_) => EntityKind::Team,
            EntityKey::CompetitionName(_) => EntityKind::Competition,
            EntityKey::MemberUrl(_) => EntityKind::TeamMember,
            EntityKey::NewsUrl(_) => EntityKind::RawNews,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            EntityKey::MatchExternalId(v)
            | EntityKey::TeamName(v)
            | EntityKey::TeamUrl(v)
            | EntityKey::CompetitionName(v)
            | EntityKey::MemberUrl(v)
            | EntityKey::NewsUrl(v) => v,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Match(Match),
    Team(Team),
    TeamMember(TeamMember),
    Competition(Competition),
    RawNews(RawNews),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Match(_) => EntityKind::Match,
            Entity::Team(_) => EntityKind::Team,
            Entity::TeamMember(_) => EntityKind::TeamMember,
            Entity::Competition(_) => EntityKind::Competition,
            Entity::RawNews(_) => EntityKind::RawNews,
        }
    }

    /// Every unique key this entity occupies.
    pub fn keys(&self) -> Vec<EntityKey> {
        match self {
            Entity::Match(m) => vec![EntityKey::MatchExternalId(m.external_id.clone())],
            Entity::Team(t) => {
                let mut keys = vec![EntityKey::TeamName(t.name.clone())];
                if let Some(url) = &t.team_url {
                    keys.push(EntityKey::TeamUrl(url.clone()));
                }
                keys
            }
            Entity::TeamMember(m) => vec![EntityKey::MemberUrl(m.team_member_url.clone())],
            Entity::Competition(c) => vec![EntityKey::CompetitionName(c.name.clone())],
            Entity::RawNews(n) => vec![EntityKey::NewsUrl(n.url.clone())],
        }
    }

    pub fn as_match(&self) -> Option<&Match> {
        match self {
            Entity::Match(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_team(&self) -> Option<&Team> {
        match self {
            Entity::Team(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_member(&self) -> Option<&TeamMember> {
        match self {
            Entity::TeamMember(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_competition(&self) -> Option<&Competition> {
        match self {
            Entity::Competition(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_news(&self) -> Option<&RawNews> {
        match self {
            Entity::RawNews(n) => Some(n),
            _ => None,
        }
    }
}

/// An entity together with its surrogate id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub id: i64,
    pub entity: Entity,
}

// ============================================================================
// Relationships
// ============================================================================

/// Participant slot on a match, in page order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeamSlotIndex {
    First,
    Second,
}

impl TeamSlotIndex {
    pub const BOTH: [TeamSlotIndex; 2] = [TeamSlotIndex::First, TeamSlotIndex::Second];

    pub fn index(&self) -> usize {
        match self {
            TeamSlotIndex::First => 0,
            TeamSlotIndex::Second => 1,
        }
    }

    /// Column value in `match_team.slot`
    pub fn as_i16(&self) -> i16 {
        self.index() as i16 + 1
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(TeamSlotIndex::First),
            1 => Some(TeamSlotIndex::Second),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    MatchTeam {
        match_id: i64,
        team_id: i64,
        slot: TeamSlotIndex,
    },
    MatchCompetition {
        match_id: i64,
        competition_id: i64,
    },
    TeamCompetition {
        team_id: i64,
        competition_id: i64,
    },
    TeamMember {
        team_id: i64,
        member_id: i64,
    },
}

/// Result of attaching a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    Added,
    AlreadyPresent,
    /// A match slot pointed elsewhere and now points at the new team.
    Replaced { previous: i64 },
    /// The match competition is permanent once set; the stored link was kept.
    Kept { existing: i64 },
}

impl Attach {
    pub fn changed(&self) -> bool {
        !matches!(self, Attach::AlreadyPresent | Attach::Kept { .. })
    }
}

/// Match selected by one of the backfill sweeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepTarget {
    pub match_id: i64,
    pub external_id: String,
    /// Match page for the live sweep, tournament page for the backfill sweep
    pub url: String,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Store-level operations. Writes go through a [`GatewayTx`].
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn GatewayTx>, StoreError>;

    async fn find_sport(&self, name: &str) -> Result<Option<Sport>, StoreError>;

    /// Matches without a competition that carry a tournament url.
    async fn matches_missing_competition(&self, sport_id: Option<i64>) -> Result<Vec<SweepTarget>, StoreError>;

    /// Scheduled or live matches that carry a match url.
    async fn active_matches(&self, sport_id: Option<i64>) -> Result<Vec<SweepTarget>, StoreError>;

    /// Subset of `urls` already stored as news.
    async fn known_news_urls(&self, urls: &[String]) -> Result<Vec<String>, StoreError>;
}

/// One transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait GatewayTx: Send {
    async fn find_by_key(&mut self, key: &EntityKey) -> Result<Option<Stored>, StoreError>;

    async fn get(&mut self, kind: EntityKind, id: i64) -> Result<Option<Stored>, StoreError>;

    async fn create(&mut self, entity: &Entity) -> Result<i64, StoreError>;

    async fn update(&mut self, id: i64, entity: &Entity) -> Result<(), StoreError>;

    async fn attach_relationship(&mut self, relation: Relation) -> Result<Attach, StoreError>;

    async fn match_teams(&mut self, match_id: i64) -> Result<[Option<i64>; 2], StoreError>;

    async fn match_status(&mut self, match_id: i64) -> Result<Option<MatchStatus>, StoreError>;

    async fn put_match_status(&mut self, match_id: i64, status: &MatchStatus) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

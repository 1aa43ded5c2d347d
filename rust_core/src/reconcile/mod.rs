//! Reconciliation engine.
//!
//! Applies one normalized record to the store in one transaction: find by
//! natural key, create or merge, link relationships, update the status
//! snapshot. A unique-constraint race on create is retried from the top so
//! the second attempt takes the update path.

pub mod merge;
pub mod status;

use crate::db::retry::execute_with_retry_custom;
use crate::db::{
    Attach, Entity, EntityKey, EntityKind, GatewayTx, PersistenceGateway, Relation, Stored,
    StoreError, TeamSlotIndex,
};
use crate::identity::{
    self, player_key, team_key, tournament_key, MatchKey, NaturalKey,
    Resolution, TeamKey, TournamentKey, Unresolved,
};
use crate::models::{
    Competition, Match, MatchListingRecord, MatchPageRecord, MatchStatus, MatchStatusKind,
    NewsRecord, PastMatchRecord, PipelineStatus, PlayerRecord, RawNews, Record, RecordKind,
    StatusPayload, Team, TeamMember, TeamRecord, TournamentInfo, TournamentRecord,
};
use crate::placeholder::{slot_team_key, TournamentRunCache};
use merge::Merge;
pub use status::{StatusDecision, StatusPolicy};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Outcomes & errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No natural key could be resolved
    Unresolved(Unresolved),
    /// A tournament record for a match that is not stored yet
    UnknownMatch(MatchKey),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unresolved(reason) => write!(f, "unresolved: {}", reason),
            SkipReason::UnknownMatch(key) => write!(f, "match {} not stored yet", key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Updated,
    Unchanged,
    Skipped(SkipReason),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error applying {kind:?} {key}: {source}")]
    Store {
        kind: RecordKind,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("unique conflict on {kind:?} {key} persisted after {attempts} attempts")]
    ConflictExhausted {
        kind: RecordKind,
        key: String,
        attempts: u32,
    },
}

// ============================================================================
// Configuration & run context
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub status_policy: StatusPolicy,
    /// Attempts per record when creates race on a unique key
    pub max_conflict_attempts: u32,
    /// Attempts per record on transient store faults
    pub max_transient_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            status_policy: StatusPolicy::default(),
            max_conflict_attempts: 3,
            max_transient_attempts: 3,
            retry_base_backoff_ms: 100,
            retry_max_backoff_ms: 2_000,
        }
    }
}

/// State shared by every record of one crawl run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub sport_id: Option<i64>,
    pub tournaments: Arc<TournamentRunCache>,
}

impl RunContext {
    pub fn new(sport_id: Option<i64>, tournaments: Arc<TournamentRunCache>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sport_id,
            tournaments,
        }
    }
}

// ============================================================================
// Per-transaction bookkeeping
// ============================================================================

/// What one attempt changed, plus cache entries to publish after commit.
#[derive(Debug, Default)]
struct Tally {
    created: bool,
    changed: bool,
    resolved_tournaments: Vec<(TournamentKey, i64, Option<String>)>,
}

impl Tally {
    fn touch(&mut self, changed: bool) {
        self.changed |= changed;
    }

    fn outcome(&self) -> RecordOutcome {
        if self.created {
            RecordOutcome::Created
        } else if self.changed {
            RecordOutcome::Updated
        } else {
            RecordOutcome::Unchanged
        }
    }
}

struct Upserted {
    id: i64,
    entity: Entity,
    created: bool,
    changed: bool,
}

// ============================================================================
// Engine
// ============================================================================

pub struct ReconciliationEngine {
    gateway: Arc<dyn PersistenceGateway>,
    config: EngineConfig,
}

impl ReconciliationEngine {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, config: EngineConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply one record. Store faults roll back this record only.
    pub async fn apply(&self, record: &Record, ctx: &RunContext) -> Result<RecordOutcome, ReconcileError> {
        let kind = record.kind();
        let key = match identity::resolve(record) {
            Resolution::Resolved(key) => key,
            Resolution::Unresolved(reason) => {
                debug!(kind = kind.as_str(), %reason, "record skipped");
                return Ok(RecordOutcome::Skipped(SkipReason::Unresolved(reason)));
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = execute_with_retry_custom(
                || self.apply_once(record, &key, ctx),
                self.config.max_transient_attempts,
                self.config.retry_base_backoff_ms,
                self.config.retry_max_backoff_ms,
            )
            .await;

            match result {
                Ok(outcome) => {
                    debug!(kind = kind.as_str(), key = %key, ?outcome, "record applied");
                    return Ok(outcome);
                }
                Err(StoreError::UniqueViolation { constraint }) => {
                    if attempt >= self.config.max_conflict_attempts {
                        return Err(ReconcileError::ConflictExhausted {
                            kind,
                            key: key.to_string(),
                            attempts: attempt,
                        });
                    }
                    info!(
                        kind = kind.as_str(),
                        key = %key,
                        constraint = %constraint,
                        attempt,
                        "unique conflict, retrying as update"
                    );
                }
                Err(source) => {
                    warn!(kind = kind.as_str(), key = %key, error = %source, "record rolled back");
                    return Err(ReconcileError::Store {
                        kind,
                        key: key.to_string(),
                        source,
                    });
                }
            }
        }
    }

    async fn apply_once(&self, record: &Record, key: &NaturalKey, ctx: &RunContext) -> Result<RecordOutcome, StoreError> {
        let mut tx = self.gateway.begin().await?;
        let mut tally = Tally::default();

        let result = match (record, key) {
            (Record::MatchListing(r), NaturalKey::Match(k)) => {
                self.match_listing(tx.as_mut(), r, k, ctx, &mut tally).await
            }
            (Record::MatchPage(r), NaturalKey::Match(k)) => {
                self.match_page(tx.as_mut(), r, k, ctx, &mut tally).await
            }
            (Record::PastMatch(r), NaturalKey::Match(k)) => {
                self.past_match(tx.as_mut(), r, k, ctx, &mut tally).await
            }
            (Record::Tournament(r), NaturalKey::Match(k)) => {
                self.tournament(tx.as_mut(), r, k, ctx, &mut tally).await
            }
            (Record::Team(r), NaturalKey::Team(k)) => self.team(tx.as_mut(), r, k, &mut tally).await,
            (Record::Player(r), NaturalKey::Player(_)) => self.player(tx.as_mut(), r, &mut tally).await,
            (Record::News(r), NaturalKey::News(k)) => {
                self.news(tx.as_mut(), r, k.as_str(), ctx, &mut tally).await
            }
            _ => Ok(Some(SkipReason::Unresolved(Unresolved::Malformed(key.to_string())))),
        };

        match result {
            Ok(skip) => {
                tx.commit().await?;
                for (key, id, page) in tally.resolved_tournaments.drain(..) {
                    ctx.tournaments.remember(key, id, page.as_deref());
                }
                Ok(match skip {
                    Some(reason) => RecordOutcome::Skipped(reason),
                    None => tally.outcome(),
                })
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Building blocks
    // ------------------------------------------------------------------------

    /// Find by `key`, create if absent, otherwise merge and write only when
    /// something changed.
    async fn upsert(&self, tx: &mut dyn GatewayTx, key: &EntityKey, incoming: Entity) -> Result<Upserted, StoreError> {
        let existing = tx.find_by_key(key).await?;
        self.upsert_found(tx, existing, incoming).await
    }

    async fn upsert_found(
        &self,
        tx: &mut dyn GatewayTx,
        existing: Option<Stored>,
        incoming: Entity,
    ) -> Result<Upserted, StoreError> {
        match existing {
            None => {
                let id = tx.create(&incoming).await?;
                Ok(Upserted {
                    id,
                    entity: incoming,
                    created: true,
                    changed: true,
                })
            }
            Some(stored) => {
                let merged = stored.entity.merged_with(&incoming);
                let changed = merged != stored.entity;
                if changed {
                    tx.update(stored.id, &merged).await?;
                }
                Ok(Upserted {
                    id: stored.id,
                    entity: merged,
                    created: false,
                    changed,
                })
            }
        }
    }

    /// Team by page URL first, then by name.
    async fn find_team(&self, tx: &mut dyn GatewayTx, key: &TeamKey, url: Option<&str>) -> Result<Option<Stored>, StoreError> {
        if let Some(url) = url {
            if let Some(found) = tx.find_by_key(&EntityKey::TeamUrl(url.to_string())).await? {
                return Ok(Some(found));
            }
        }
        tx.find_by_key(&EntityKey::TeamName(key.to_string())).await
    }

    async fn upsert_team(&self, tx: &mut dyn GatewayTx, key: &TeamKey, incoming: Team) -> Result<Upserted, StoreError> {
        let existing = self.find_team(tx, key, incoming.team_url.as_deref()).await?;
        self.upsert_found(tx, existing, Entity::Team(incoming)).await
    }

    async fn upsert_match(&self, tx: &mut dyn GatewayTx, incoming: Match) -> Result<(i64, Match, Upserted), StoreError> {
        let key = EntityKey::MatchExternalId(incoming.external_id.clone());
        let upserted = self.upsert(tx, &key, Entity::Match(incoming)).await?;
        let current = upserted.entity.as_match().cloned().unwrap_or_default();
        Ok((upserted.id, current, upserted))
    }

    async fn apply_status(&self, tx: &mut dyn GatewayTx, match_id: i64, incoming: &MatchStatus) -> Result<bool, StoreError> {
        let current = tx.match_status(match_id).await?;
        match status::decide(current.as_ref(), incoming, self.config.status_policy) {
            StatusDecision::Create(next) | StatusDecision::Overwrite(next) => {
                tx.put_match_status(match_id, &next).await?;
                Ok(true)
            }
            StatusDecision::Unchanged => Ok(false),
            StatusDecision::Rejected(rejected) => {
                warn!(
                    match_id,
                    from = current.as_ref().map(|s| s.name.as_str()).unwrap_or("none"),
                    to = rejected.name.as_str(),
                    "status regression rejected"
                );
                Ok(false)
            }
        }
    }

    /// Merge a payload into the stored snapshot without changing its name.
    async fn apply_payload(&self, tx: &mut dyn GatewayTx, match_id: i64, payload: &StatusPayload) -> Result<bool, StoreError> {
        match tx.match_status(match_id).await? {
            Some(current) => {
                let incoming = MatchStatus {
                    name: current.name,
                    status: payload.clone(),
                };
                self.apply_status(tx, match_id, &incoming).await
            }
            None => Ok(false),
        }
    }

    async fn attach(&self, tx: &mut dyn GatewayTx, relation: Relation, tally: &mut Tally) -> Result<Attach, StoreError> {
        let attach = tx.attach_relationship(relation).await?;
        match attach {
            Attach::Replaced { previous } => info!(?relation, previous, "relationship replaced by later crawl"),
            Attach::Kept { existing } => warn!(?relation, existing, "permanent relationship kept"),
            Attach::Added | Attach::AlreadyPresent => {}
        }
        tally.touch(attach.changed());
        Ok(attach)
    }

    /// Link every team on the match to the match's competition.
    async fn propagate_competition(&self, tx: &mut dyn GatewayTx, match_id: i64, tally: &mut Tally) -> Result<(), StoreError> {
        let Some(stored) = tx.get(EntityKind::Match, match_id).await? else {
            return Err(StoreError::NotFound {
                kind: EntityKind::Match,
                id: match_id,
            });
        };
        let Some(competition_id) = stored.entity.as_match().and_then(|m| m.competition_id) else {
            return Ok(());
        };
        for team_id in tx.match_teams(match_id).await?.into_iter().flatten() {
            self.attach(tx, Relation::TeamCompetition { team_id, competition_id }, tally)
                .await?;
        }
        Ok(())
    }

    /// Set the match's tournament if unset. An already attached tournament
    /// is re-validated: same name merges the new details, a different name is
    /// logged and the existing link kept.
    async fn attach_tournament(
        &self,
        tx: &mut dyn GatewayTx,
        match_id: i64,
        current: Option<i64>,
        info: &TournamentInfo,
        ctx: &RunContext,
        tally: &mut Tally,
    ) -> Result<(), StoreError> {
        let Some(key) = info.name.as_deref().and_then(|n| tournament_key(n).resolved()) else {
            debug!(match_id, "tournament without a usable name");
            return Ok(());
        };
        let incoming = Competition {
            name: key.to_string(),
            description: info.description.clone(),
            prize_pool: info.prize_pool.clone(),
            location: info.location.clone(),
            start_date: info.start_date,
            image_url: info.logo_url.clone(),
            sport_id: ctx.sport_id,
        };

        if let Some(competition_id) = current {
            let existing = tx.get(EntityKind::Competition, competition_id).await?;
            let Some(existing) = existing else {
                return Err(StoreError::NotFound {
                    kind: EntityKind::Competition,
                    id: competition_id,
                });
            };
            let same_name = existing
                .entity
                .as_competition()
                .is_some_and(|c| c.name == incoming.name);
            if !same_name {
                warn!(match_id, competition_id, incoming = %key, "match already attached to another tournament");
                return Ok(());
            }
            let upserted = self.upsert_found(tx, Some(existing), Entity::Competition(incoming)).await?;
            tally.touch(upserted.changed);
            return Ok(());
        }

        let competition_id = match ctx.tournaments.competition(&key) {
            Some(id) if !info.has_details() => id,
            Some(_) => {
                let upserted = self
                    .upsert(tx, &EntityKey::CompetitionName(key.to_string()), Entity::Competition(incoming))
                    .await?;
                tally.touch(upserted.changed);
                upserted.id
            }
            None => {
                let upserted = self
                    .upsert(tx, &EntityKey::CompetitionName(key.to_string()), Entity::Competition(incoming))
                    .await?;
                tally.touch(upserted.changed);
                tally
                    .resolved_tournaments
                    .push((key.clone(), upserted.id, info.page_url.clone()));
                upserted.id
            }
        };
        self.attach(tx, Relation::MatchCompetition { match_id, competition_id }, tally)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Per-record flows. `Ok(Some(reason))` commits nothing of note and
    // reports the record as skipped.
    // ------------------------------------------------------------------------

    async fn match_listing(
        &self,
        tx: &mut dyn GatewayTx,
        r: &MatchListingRecord,
        key: &MatchKey,
        ctx: &RunContext,
        tally: &mut Tally,
    ) -> Result<Option<SkipReason>, StoreError> {
        let (match_id, _, upserted) = self
            .upsert_match(
                tx,
                Match {
                    external_id: key.to_string(),
                    match_name: r.match_name.clone(),
                    match_url: r.match_url.clone(),
                    planned_start_datetime: r.planned_start,
                    sport_id: ctx.sport_id,
                    ..Default::default()
                },
            )
            .await?;
        tally.created = upserted.created;
        tally.touch(upserted.changed);

        if let Some(name) = r.status {
            let changed = self.apply_status(tx, match_id, &MatchStatus::new(name)).await?;
            tally.touch(changed);
        }
        Ok(None)
    }

    async fn match_page(
        &self,
        tx: &mut dyn GatewayTx,
        r: &MatchPageRecord,
        key: &MatchKey,
        ctx: &RunContext,
        tally: &mut Tally,
    ) -> Result<Option<SkipReason>, StoreError> {
        let (match_id, current, upserted) = self
            .upsert_match(
                tx,
                Match {
                    external_id: key.to_string(),
                    match_name: r.match_name.clone(),
                    pretty_match_name: r.pretty_match_name.clone(),
                    match_url: r.match_url.clone(),
                    tournament_url: r.tournament_url.clone(),
                    planned_start_datetime: r.planned_start,
                    streams: r.streams.clone(),
                    sport_id: ctx.sport_id,
                    competition_id: None,
                },
            )
            .await?;
        tally.created = upserted.created;
        tally.touch(upserted.changed);

        for (slot, team_slot) in TeamSlotIndex::BOTH.iter().zip(r.teams.iter()) {
            let slot_key = match slot_team_key(team_slot) {
                Resolution::Resolved(k) => k,
                Resolution::Unresolved(reason) => {
                    debug!(match_id, ?slot, %reason, "slot left unassigned");
                    continue;
                }
            };
            let team = self
                .upsert_team(
                    tx,
                    &slot_key,
                    Team {
                        name: slot_key.to_string(),
                        pretty_name: team_slot.pretty_name.clone(),
                        team_url: team_slot.page_url.clone(),
                        image_url: team_slot.logo_url.clone(),
                        ..Default::default()
                    },
                )
                .await?;
            tally.touch(team.changed);
            self.attach(
                tx,
                Relation::MatchTeam {
                    match_id,
                    team_id: team.id,
                    slot: *slot,
                },
                tally,
            )
            .await?;
        }

        let changed = match r.status {
            Some(name) => {
                let incoming = MatchStatus {
                    name,
                    status: r.payload.clone(),
                };
                self.apply_status(tx, match_id, &incoming).await?
            }
            None => self.apply_payload(tx, match_id, &r.payload).await?,
        };
        tally.touch(changed);

        match (&r.tournament, r.tournament_url.as_deref()) {
            (Some(info), _) => {
                self.attach_tournament(tx, match_id, current.competition_id, info, ctx, tally)
                    .await?;
            }
            (None, Some(url)) if current.competition_id.is_none() => {
                if let Some((_, competition_id)) = ctx.tournaments.competition_for_page(url) {
                    self.attach(tx, Relation::MatchCompetition { match_id, competition_id }, tally)
                        .await?;
                }
            }
            _ => {}
        }
        self.propagate_competition(tx, match_id, tally).await?;
        Ok(None)
    }

    async fn past_match(
        &self,
        tx: &mut dyn GatewayTx,
        r: &PastMatchRecord,
        key: &MatchKey,
        ctx: &RunContext,
        tally: &mut Tally,
    ) -> Result<Option<SkipReason>, StoreError> {
        let (match_id, _, upserted) = self
            .upsert_match(
                tx,
                Match {
                    external_id: key.to_string(),
                    match_name: r.match_name.clone(),
                    match_url: r.match_url.clone(),
                    planned_start_datetime: r.date,
                    sport_id: ctx.sport_id,
                    ..Default::default()
                },
            )
            .await?;
        tally.created = upserted.created;
        tally.touch(upserted.changed);

        let finished = MatchStatus {
            name: MatchStatusKind::Finished,
            status: StatusPayload {
                team1_score: r.team1_score,
                team2_score: r.team2_score,
                match_format: None,
            },
        };
        let changed = self.apply_status(tx, match_id, &finished).await?;
        tally.touch(changed);

        // Result listings show display names, so only link teams that exist.
        for (slot, name) in TeamSlotIndex::BOTH.iter().zip([&r.team1, &r.team2]) {
            let Some(name_key) = name.as_deref().and_then(|n| team_key(n).resolved()) else {
                continue;
            };
            let Some(team) = tx.find_by_key(&EntityKey::TeamName(name_key.to_string())).await? else {
                debug!(match_id, team = %name_key, "past match team not stored, not linked");
                continue;
            };
            self.attach(
                tx,
                Relation::MatchTeam {
                    match_id,
                    team_id: team.id,
                    slot: *slot,
                },
                tally,
            )
            .await?;
        }
        self.propagate_competition(tx, match_id, tally).await?;
        Ok(None)
    }

    async fn tournament(
        &self,
        tx: &mut dyn GatewayTx,
        r: &TournamentRecord,
        key: &MatchKey,
        ctx: &RunContext,
        tally: &mut Tally,
    ) -> Result<Option<SkipReason>, StoreError> {
        let Some(stored) = tx.find_by_key(&EntityKey::MatchExternalId(key.to_string())).await? else {
            return Ok(Some(SkipReason::UnknownMatch(key.clone())));
        };
        if r.info.name.as_deref().and_then(|n| tournament_key(n).resolved()).is_none() {
            return Ok(Some(SkipReason::Unresolved(Unresolved::Missing("tournament_name"))));
        }
        let current = stored.entity.as_match().and_then(|m| m.competition_id);
        self.attach_tournament(tx, stored.id, current, &r.info, ctx, tally)
            .await?;
        self.propagate_competition(tx, stored.id, tally).await?;
        Ok(None)
    }

    async fn team(&self, tx: &mut dyn GatewayTx, r: &TeamRecord, key: &TeamKey, tally: &mut Tally) -> Result<Option<SkipReason>, StoreError> {
        let team = self
            .upsert_team(
                tx,
                key,
                Team {
                    name: key.to_string(),
                    pretty_name: r.pretty_name.clone(),
                    team_url: r.page_url.clone(),
                    image_url: r.logo_url.clone(),
                    region: r.region.clone(),
                    stats: r.stats.clone(),
                    regalia: r.regalia.clone(),
                },
            )
            .await?;
        tally.created = team.created;
        tally.touch(team.changed);

        for entry in &r.roster {
            let Some(member_key) = entry.profile_url.as_deref().and_then(|u| player_key(u).resolved()) else {
                debug!(team = %key, nickname = ?entry.nickname, "roster entry without profile link");
                continue;
            };
            let member = self
                .upsert(
                    tx,
                    &EntityKey::MemberUrl(member_key.to_string()),
                    Entity::TeamMember(TeamMember {
                        team_member_url: member_key.to_string(),
                        nickname: entry.nickname.clone(),
                        country: entry.country.clone(),
                        image_url: entry.photo_url.clone(),
                        stats: BTreeMap::from([("status".to_string(), entry.status.clone())]),
                        ..Default::default()
                    }),
                )
                .await?;
            tally.touch(member.changed);
            self.attach(
                tx,
                Relation::TeamMember {
                    team_id: team.id,
                    member_id: member.id,
                },
                tally,
            )
            .await?;
        }
        Ok(None)
    }

    async fn player(&self, tx: &mut dyn GatewayTx, r: &PlayerRecord, tally: &mut Tally) -> Result<Option<SkipReason>, StoreError> {
        let Some(member_key) = r.profile_url.as_deref().and_then(|u| player_key(u).resolved()) else {
            return Ok(Some(SkipReason::Unresolved(Unresolved::Missing("team_member_url"))));
        };
        let mut stats = BTreeMap::new();
        for (name, value) in [
            ("games_last_year", &r.games_last_year),
            ("games_overall", &r.games_overall),
            ("status", &r.status),
        ] {
            if let Some(value) = value {
                stats.insert(name.to_string(), value.clone());
            }
        }
        let member = self
            .upsert(
                tx,
                &EntityKey::MemberUrl(member_key.to_string()),
                Entity::TeamMember(TeamMember {
                    team_member_url: member_key.to_string(),
                    nickname: r.nickname.clone(),
                    name: r.name.clone(),
                    age: r.age,
                    country: r.country.clone(),
                    image_url: r.image_url.clone(),
                    stats,
                }),
            )
            .await?;
        tally.created = member.created;
        tally.touch(member.changed);

        if let Some(slug_key) = r.team_slug.as_deref().and_then(|slug| team_key(slug).resolved()) {
            let team = self
                .upsert_team(
                    tx,
                    &slug_key,
                    Team {
                        name: slug_key.to_string(),
                        team_url: r.team_url.clone(),
                        ..Default::default()
                    },
                )
                .await?;
            tally.touch(team.changed);
            self.attach(
                tx,
                Relation::TeamMember {
                    team_id: team.id,
                    member_id: member.id,
                },
                tally,
            )
            .await?;
        }
        Ok(None)
    }

    async fn news(
        &self,
        tx: &mut dyn GatewayTx,
        r: &NewsRecord,
        url: &str,
        ctx: &RunContext,
        tally: &mut Tally,
    ) -> Result<Option<SkipReason>, StoreError> {
        let upserted = self
            .upsert(
                tx,
                &EntityKey::NewsUrl(url.to_string()),
                Entity::RawNews(RawNews {
                    url: url.to_string(),
                    header: r.header.clone(),
                    text: r.text.clone(),
                    news_creation_time: r.created_at,
                    sport_id: ctx.sport_id,
                    pipeline_status: PipelineStatus::New,
                    pipeline_update_time: Some(chrono::Utc::now().naive_utc()),
                }),
            )
            .await?;
        tally.created = upserted.created;
        tally.touch(upserted.changed);
        Ok(None)
    }
}

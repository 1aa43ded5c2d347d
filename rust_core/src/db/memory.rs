//! In-process persistence gateway.
//!
//! Transactions are serialized through one async mutex and roll back by
//! restoring a snapshot, so the store behaves like a strictly serializable
//! database. Faults can be injected per key to drive the engine's conflict
//! and rollback paths in tests and dry runs.

use super::gateway::{
    Attach, Entity, EntityKey, EntityKind, GatewayTx, PersistenceGateway, Relation, Stored,
    StoreError, SweepTarget,
};
use crate::models::{MatchStatus, MatchStatusKind, PipelineStatus, Sport, DEFAULT_SPORT};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct State {
    next_id: i64,
    rows: BTreeMap<i64, Entity>,
    statuses: BTreeMap<i64, MatchStatus>,
    match_teams: BTreeMap<i64, [Option<i64>; 2]>,
    team_competitions: BTreeSet<(i64, i64)>,
    team_members: BTreeSet<(i64, i64)>,
    sports: Vec<Sport>,
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn find(&self, key: &EntityKey) -> Option<Stored> {
        self.rows
            .iter()
            .find(|(_, entity)| entity.keys().contains(key))
            .map(|(id, entity)| Stored {
                id: *id,
                entity: entity.clone(),
            })
    }

    fn get(&self, kind: EntityKind, id: i64) -> Option<Stored> {
        self.rows
            .get(&id)
            .filter(|entity| entity.kind() == kind)
            .map(|entity| Stored {
                id,
                entity: entity.clone(),
            })
    }

    /// First unique key of `entity` already owned by a row other than `own_id`.
    fn conflicting_key(&self, entity: &Entity, own_id: Option<i64>) -> Option<EntityKey> {
        entity.keys().into_iter().find(|key| {
            self.find(key)
                .map(|stored| Some(stored.id) != own_id)
                .unwrap_or(false)
        })
    }

    fn insert(&mut self, entity: Entity) -> i64 {
        let id = self.allocate_id();
        self.rows.insert(id, entity);
        id
    }
}

fn unique_violation(key: &EntityKey) -> StoreError {
    let column = match key {
        EntityKey::MatchExternalId(_) => "external_id",
        EntityKey::TeamName(_) | EntityKey::CompetitionName(_) => "name",
        EntityKey::TeamUrl(_) => "team_url",
        EntityKey::MemberUrl(_) => "team_member_url",
        EntityKey::NewsUrl(_) => "url",
    };
    StoreError::UniqueViolation {
        constraint: format!("{}_{}_key", key.kind(), column),
    }
}

/// Natural keys and the match's competition link are not writable through
/// `update`, matching the Postgres gateway.
fn preserve_identity(existing: &Entity, incoming: &Entity) -> Entity {
    let mut merged = incoming.clone();
    match (existing, &mut merged) {
        (Entity::Match(old), Entity::Match(new)) => {
            new.external_id = old.external_id.clone();
            new.competition_id = old.competition_id;
        }
        (Entity::Team(old), Entity::Team(new)) => new.name = old.name.clone(),
        (Entity::TeamMember(old), Entity::TeamMember(new)) => {
            new.team_member_url = old.team_member_url.clone()
        }
        (Entity::Competition(old), Entity::Competition(new)) => new.name = old.name.clone(),
        (Entity::RawNews(old), Entity::RawNews(new)) => new.url = old.url.clone(),
        _ => {}
    }
    merged
}

#[derive(Debug, Default)]
struct Faults {
    /// Rows a concurrent writer commits just before our create of the same key
    unique_races: Vec<Entity>,
    /// Keys whose writes fail with a non-retriable database error
    broken_keys: Vec<EntityKey>,
    /// Writes left to fail with a transient error
    transient_failures: u32,
}

#[derive(Clone)]
pub struct InMemoryGateway {
    state: Arc<AsyncMutex<State>>,
    faults: Arc<Mutex<Faults>>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    /// Empty store with the default sport seeded.
    pub fn new() -> Self {
        let mut state = State::default();
        let sport_id = state.allocate_id();
        state.sports.push(Sport {
            sport_id,
            name: DEFAULT_SPORT.to_string(),
        });
        Self {
            state: Arc::new(AsyncMutex::new(state)),
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    /// The next create of any key `competitor` owns first commits
    /// `competitor` on a "concurrent" connection, then fails with a unique
    /// violation.
    pub fn inject_unique_race(&self, competitor: Entity) {
        self.faults.lock().unique_races.push(competitor);
    }

    /// Every write touching `key` fails with a database error.
    pub fn inject_fault(&self, key: EntityKey) {
        self.faults.lock().broken_keys.push(key);
    }

    /// The next `count` writes fail with a transient error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.faults.lock().transient_failures = count;
    }

    pub async fn insert(&self, entity: Entity) -> i64 {
        self.state.lock().await.insert(entity)
    }

    pub async fn count(&self, kind: EntityKind) -> usize {
        self.state
            .lock()
            .await
            .rows
            .values()
            .filter(|entity| entity.kind() == kind)
            .count()
    }

    pub async fn find(&self, key: &EntityKey) -> Option<Stored> {
        self.state.lock().await.find(key)
    }

    pub async fn teams_of_match(&self, match_id: i64) -> [Option<i64>; 2] {
        self.state
            .lock()
            .await
            .match_teams
            .get(&match_id)
            .copied()
            .unwrap_or_default()
    }

    pub async fn status_of(&self, match_id: i64) -> Option<MatchStatus> {
        self.state.lock().await.statuses.get(&match_id).cloned()
    }

    pub async fn competitions_of_team(&self, team_id: i64) -> Vec<i64> {
        self.state
            .lock()
            .await
            .team_competitions
            .iter()
            .filter(|(team, _)| *team == team_id)
            .map(|(_, competition)| *competition)
            .collect()
    }

    pub async fn members_of_team(&self, team_id: i64) -> Vec<i64> {
        self.state
            .lock()
            .await
            .team_members
            .iter()
            .filter(|(team, _)| *team == team_id)
            .map(|(_, member)| *member)
            .collect()
    }

    /// Flag a stored article the way the downstream news consumer does.
    pub async fn mark_news(&self, url: &str, status: PipelineStatus) -> bool {
        let mut state = self.state.lock().await;
        let Some(stored) = state.find(&EntityKey::NewsUrl(url.to_string())) else {
            return false;
        };
        if let Some(Entity::RawNews(news)) = state.rows.get_mut(&stored.id) {
            news.pipeline_status = status;
        }
        true
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn begin(&self) -> Result<Box<dyn GatewayTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = (*guard).clone();
        Ok(Box::new(MemoryTx {
            guard,
            snapshot: Some(snapshot),
            faults: self.faults.clone(),
        }))
    }

    async fn find_sport(&self, name: &str) -> Result<Option<Sport>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .sports
            .iter()
            .find(|sport| sport.name == name)
            .cloned())
    }

    async fn matches_missing_competition(&self, sport_id: Option<i64>) -> Result<Vec<SweepTarget>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter_map(|(id, entity)| {
                let m = entity.as_match()?;
                if m.competition_id.is_some() || (sport_id.is_some() && m.sport_id != sport_id) {
                    return None;
                }
                Some(SweepTarget {
                    match_id: *id,
                    external_id: m.external_id.clone(),
                    url: m.tournament_url.clone()?,
                })
            })
            .collect())
    }

    async fn active_matches(&self, sport_id: Option<i64>) -> Result<Vec<SweepTarget>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter_map(|(id, entity)| {
                let m = entity.as_match()?;
                let status = state.statuses.get(id)?;
                if status.name == MatchStatusKind::Finished
                    || (sport_id.is_some() && m.sport_id != sport_id)
                {
                    return None;
                }
                Some(SweepTarget {
                    match_id: *id,
                    external_id: m.external_id.clone(),
                    url: m.match_url.clone()?,
                })
            })
            .collect())
    }

    async fn known_news_urls(&self, urls: &[String]) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(urls
            .iter()
            .filter(|url| state.find(&EntityKey::NewsUrl(url.to_string())).is_some())
            .cloned()
            .collect())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    snapshot: Option<State>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryTx {
    fn check_faults(&mut self, entity: &Entity) -> Result<(), StoreError> {
        let mut faults = self.faults.lock();
        if faults.transient_failures > 0 {
            faults.transient_failures -= 1;
            return Err(StoreError::Transient("connection reset by peer".into()));
        }
        if let Some(key) = entity.keys().into_iter().find(|k| faults.broken_keys.contains(k)) {
            return Err(StoreError::Database(format!("injected fault on {}", key)));
        }
        Ok(())
    }

    /// Commit a pending competitor row on behalf of another connection.
    fn run_unique_race(&mut self, entity: &Entity) -> Option<EntityKey> {
        let keys = entity.keys();
        let competitor = {
            let mut faults = self.faults.lock();
            let position = faults
                .unique_races
                .iter()
                .position(|c| c.keys().iter().any(|k| keys.contains(k)))?;
            faults.unique_races.remove(position)
        };
        let key = competitor.keys().into_iter().find(|k| keys.contains(k))?;
        let id = self.guard.insert(competitor.clone());
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.rows.insert(id, competitor);
            snapshot.next_id = self.guard.next_id;
        }
        Some(key)
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl GatewayTx for MemoryTx {
    async fn find_by_key(&mut self, key: &EntityKey) -> Result<Option<Stored>, StoreError> {
        Ok(self.guard.find(key))
    }

    async fn get(&mut self, kind: EntityKind, id: i64) -> Result<Option<Stored>, StoreError> {
        Ok(self.guard.get(kind, id))
    }

    async fn create(&mut self, entity: &Entity) -> Result<i64, StoreError> {
        self.check_faults(entity)?;
        if let Some(key) = self.run_unique_race(entity) {
            return Err(unique_violation(&key));
        }
        if let Some(key) = self.guard.conflicting_key(entity, None) {
            return Err(unique_violation(&key));
        }
        Ok(self.guard.insert(entity.clone()))
    }

    async fn update(&mut self, id: i64, entity: &Entity) -> Result<(), StoreError> {
        self.check_faults(entity)?;
        let existing = self
            .guard
            .get(entity.kind(), id)
            .ok_or(StoreError::NotFound {
                kind: entity.kind(),
                id,
            })?;
        let merged = preserve_identity(&existing.entity, entity);
        if let Some(key) = self.guard.conflicting_key(&merged, Some(id)) {
            return Err(unique_violation(&key));
        }
        self.guard.rows.insert(id, merged);
        Ok(())
    }

    async fn attach_relationship(&mut self, relation: Relation) -> Result<Attach, StoreError> {
        let state = &mut *self.guard;
        match relation {
            Relation::MatchTeam { match_id, team_id, slot } => {
                if state.get(EntityKind::Match, match_id).is_none() {
                    return Err(StoreError::NotFound { kind: EntityKind::Match, id: match_id });
                }
                let slots = state.match_teams.entry(match_id).or_default();
                let occupant = slots[slot.index()];
                if occupant == Some(team_id) {
                    return Ok(Attach::AlreadyPresent);
                }
                for other in slots.iter_mut() {
                    if *other == Some(team_id) {
                        *other = None;
                    }
                }
                slots[slot.index()] = Some(team_id);
                Ok(match occupant {
                    Some(previous) => Attach::Replaced { previous },
                    None => Attach::Added,
                })
            }
            Relation::MatchCompetition { match_id, competition_id } => {
                let Some(Entity::Match(m)) = state.rows.get_mut(&match_id) else {
                    return Err(StoreError::NotFound { kind: EntityKind::Match, id: match_id });
                };
                Ok(match m.competition_id {
                    Some(existing) if existing == competition_id => Attach::AlreadyPresent,
                    Some(existing) => Attach::Kept { existing },
                    None => {
                        m.competition_id = Some(competition_id);
                        Attach::Added
                    }
                })
            }
            Relation::TeamCompetition { team_id, competition_id } => {
                Ok(inserted(state.team_competitions.insert((team_id, competition_id))))
            }
            Relation::TeamMember { team_id, member_id } => {
                Ok(inserted(state.team_members.insert((team_id, member_id))))
            }
        }
    }

    async fn match_teams(&mut self, match_id: i64) -> Result<[Option<i64>; 2], StoreError> {
        Ok(self.guard.match_teams.get(&match_id).copied().unwrap_or_default())
    }

    async fn match_status(&mut self, match_id: i64) -> Result<Option<MatchStatus>, StoreError> {
        Ok(self.guard.statuses.get(&match_id).cloned())
    }

    async fn put_match_status(&mut self, match_id: i64, status: &MatchStatus) -> Result<(), StoreError> {
        self.guard.statuses.insert(match_id, status.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // dropping with the snapshot still held restores it
        drop(self);
        Ok(())
    }
}

fn inserted(was_new: bool) -> Attach {
    if was_new {
        Attach::Added
    } else {
        Attach::AlreadyPresent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TeamSlotIndex;
    use crate::models::{Match, Team};

    fn team(name: &str) -> Entity {
        Entity::Team(Team {
            name: name.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let gateway = InMemoryGateway::new();
        let mut tx = gateway.begin().await.unwrap();
        tx.create(&team("astralis")).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(gateway.count(EntityKind::Team).await, 0);
    }

    #[tokio::test]
    async fn test_dropped_tx_rolls_back() {
        let gateway = InMemoryGateway::new();
        {
            let mut tx = gateway.begin().await.unwrap();
            tx.create(&team("astralis")).await.unwrap();
        }
        assert_eq!(gateway.count(EntityKind::Team).await, 0);
    }

    #[tokio::test]
    async fn test_commit_keeps_writes_and_enforces_unique_keys() {
        let gateway = InMemoryGateway::new();
        let mut tx = gateway.begin().await.unwrap();
        tx.create(&team("astralis")).await.unwrap();
        let err = tx.create(&team("astralis")).await.unwrap_err();
        assert!(err.is_unique_violation());
        tx.commit().await.unwrap();
        assert_eq!(gateway.count(EntityKind::Team).await, 1);
    }

    #[tokio::test]
    async fn test_unique_race_survives_rollback() {
        let gateway = InMemoryGateway::new();
        gateway.inject_unique_race(team("navi"));
        let mut tx = gateway.begin().await.unwrap();
        let err = tx.create(&team("navi")).await.unwrap_err();
        assert!(err.is_unique_violation());
        tx.rollback().await.unwrap();
        assert!(gateway.find(&EntityKey::TeamName("navi".into())).await.is_some());
    }

    #[tokio::test]
    async fn test_update_keeps_competition_link() {
        let gateway = InMemoryGateway::new();
        let mut tx = gateway.begin().await.unwrap();
        let match_id = tx
            .create(&Entity::Match(Match {
                external_id: "1".into(),
                ..Default::default()
            }))
            .await
            .unwrap();
        let attach = tx
            .attach_relationship(Relation::MatchCompetition { match_id, competition_id: 99 })
            .await
            .unwrap();
        assert_eq!(attach, Attach::Added);
        tx.update(
            match_id,
            &Entity::Match(Match {
                external_id: "1".into(),
                match_name: Some("a vs b".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        let stored = tx.get(EntityKind::Match, match_id).await.unwrap().unwrap();
        assert_eq!(stored.entity.as_match().unwrap().competition_id, Some(99));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_match_competition_is_never_moved() {
        let gateway = InMemoryGateway::new();
        let mut tx = gateway.begin().await.unwrap();
        let match_id = tx
            .create(&Entity::Match(Match {
                external_id: "2".into(),
                ..Default::default()
            }))
            .await
            .unwrap();
        let attach = |competition_id| Relation::MatchCompetition { match_id, competition_id };
        assert_eq!(tx.attach_relationship(attach(7)).await.unwrap(), Attach::Added);
        assert_eq!(tx.attach_relationship(attach(7)).await.unwrap(), Attach::AlreadyPresent);

        let moved = tx.attach_relationship(attach(8)).await.unwrap();
        assert_eq!(moved, Attach::Kept { existing: 7 });
        assert!(!moved.changed());
        let stored = tx.get(EntityKind::Match, match_id).await.unwrap().unwrap();
        assert_eq!(stored.entity.as_match().unwrap().competition_id, Some(7));
    }

    #[tokio::test]
    async fn test_slot_attach_moves_team() {
        let gateway = InMemoryGateway::new();
        let mut tx = gateway.begin().await.unwrap();
        let match_id = tx
            .create(&Entity::Match(Match {
                external_id: "5".into(),
                ..Default::default()
            }))
            .await
            .unwrap();
        let a = tx.create(&team("a")).await.unwrap();
        let b = tx.create(&team("b")).await.unwrap();
        let first = Relation::MatchTeam { match_id, team_id: a, slot: TeamSlotIndex::First };
        assert_eq!(tx.attach_relationship(first).await.unwrap(), Attach::Added);
        assert_eq!(tx.attach_relationship(first).await.unwrap(), Attach::AlreadyPresent);
        let replace = Relation::MatchTeam { match_id, team_id: b, slot: TeamSlotIndex::First };
        assert_eq!(
            tx.attach_relationship(replace).await.unwrap(),
            Attach::Replaced { previous: a }
        );
        assert_eq!(tx.match_teams(match_id).await.unwrap(), [Some(b), None]);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let gateway = InMemoryGateway::new();
        gateway.inject_fault(EntityKey::TeamName("broken".into()));
        gateway.inject_transient_failures(1);
        let mut tx = gateway.begin().await.unwrap();
        assert!(tx.create(&team("ok")).await.unwrap_err().is_transient());
        assert!(tx.create(&team("ok")).await.is_ok());
        assert!(matches!(
            tx.create(&team("broken")).await,
            Err(StoreError::Database(_))
        ));
        tx.commit().await.unwrap();
    }
}

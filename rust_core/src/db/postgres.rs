//! Postgres-backed persistence gateway.

use super::gateway::{
    Attach, Entity, EntityKey, EntityKind, GatewayTx, PersistenceGateway, Relation, Stored,
    StoreError, SweepTarget,
};
use super::retry::Retriable;
use crate::models::{
    Accomplishment, Competition, Match, MatchStatus, MatchStatusKind, PipelineStatus, RawNews,
    Sport, StatusPayload, StreamInfo, Team, TeamMember,
};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::Postgres;
use sqlx::types::Json;
use sqlx::{PgPool, Transaction};
use std::collections::BTreeMap;

/// Postgres SQLSTATE codes the gateway classifies
const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

fn map_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        match db_err.code().as_deref() {
            Some(UNIQUE_VIOLATION) => {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                }
            }
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                return StoreError::Transient(db_err.message().to_string())
            }
            _ => {}
        }
    }
    if e.is_retriable() {
        StoreError::Transient(e.to_string())
    } else {
        StoreError::Database(e.to_string())
    }
}

// ============================================================================
// Rows
// ============================================================================

const MATCH_COLUMNS: &str = "match_id, external_id, match_name, pretty_match_name, match_url, \
     tournament_url, planned_start_datetime, streams, sport_id, competition_id";

#[derive(Debug, sqlx::FromRow)]
struct MatchRow {
    match_id: i64,
    external_id: String,
    match_name: Option<String>,
    pretty_match_name: Option<String>,
    match_url: Option<String>,
    tournament_url: Option<String>,
    planned_start_datetime: Option<NaiveDateTime>,
    streams: Json<BTreeMap<String, StreamInfo>>,
    sport_id: Option<i64>,
    competition_id: Option<i64>,
}

impl From<MatchRow> for Stored {
    fn from(row: MatchRow) -> Self {
        Stored {
            id: row.match_id,
            entity: Entity::Match(Match {
                external_id: row.external_id,
                match_name: row.match_name,
                pretty_match_name: row.pretty_match_name,
                match_url: row.match_url,
                tournament_url: row.tournament_url,
                planned_start_datetime: row.planned_start_datetime,
                streams: row.streams.0,
                sport_id: row.sport_id,
                competition_id: row.competition_id,
            }),
        }
    }
}

const TEAM_COLUMNS: &str = "team_id, name, pretty_name, team_url, image_url, region, stats, regalia";

#[derive(Debug, sqlx::FromRow)]
struct TeamRow {
    team_id: i64,
    name: String,
    pretty_name: Option<String>,
    team_url: Option<String>,
    image_url: Option<String>,
    region: Option<String>,
    stats: Json<BTreeMap<String, String>>,
    regalia: Json<BTreeMap<String, Accomplishment>>,
}

impl From<TeamRow> for Stored {
    fn from(row: TeamRow) -> Self {
        Stored {
            id: row.team_id,
            entity: Entity::Team(Team {
                name: row.name,
                pretty_name: row.pretty_name,
                team_url: row.team_url,
                image_url: row.image_url,
                region: row.region,
                stats: row.stats.0,
                regalia: row.regalia.0,
            }),
        }
    }
}

const MEMBER_COLUMNS: &str =
    "team_member_id, team_member_url, nickname, name, age, country, image_url, stats";

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    team_member_id: i64,
    team_member_url: String,
    nickname: Option<String>,
    name: Option<String>,
    age: Option<i32>,
    country: Option<String>,
    image_url: Option<String>,
    stats: Json<BTreeMap<String, String>>,
}

impl From<MemberRow> for Stored {
    fn from(row: MemberRow) -> Self {
        Stored {
            id: row.team_member_id,
            entity: Entity::TeamMember(TeamMember {
                team_member_url: row.team_member_url,
                nickname: row.nickname,
                name: row.name,
                age: row.age.and_then(|a| u32::try_from(a).ok()),
                country: row.country,
                image_url: row.image_url,
                stats: row.stats.0,
            }),
        }
    }
}

const COMPETITION_COLUMNS: &str =
    "competition_id, name, description, prize_pool, location, start_date, image_url, sport_id";

#[derive(Debug, sqlx::FromRow)]
struct CompetitionRow {
    competition_id: i64,
    name: String,
    description: Option<String>,
    prize_pool: Option<String>,
    location: Option<String>,
    start_date: Option<NaiveDateTime>,
    image_url: Option<String>,
    sport_id: Option<i64>,
}

impl From<CompetitionRow> for Stored {
    fn from(row: CompetitionRow) -> Self {
        Stored {
            id: row.competition_id,
            entity: Entity::Competition(Competition {
                name: row.name,
                description: row.description,
                prize_pool: row.prize_pool,
                location: row.location,
                start_date: row.start_date,
                image_url: row.image_url,
                sport_id: row.sport_id,
            }),
        }
    }
}

const NEWS_COLUMNS: &str = "raw_news_id, url, header, text, news_creation_time, sport_id, \
     pipeline_status, pipeline_update_time";

#[derive(Debug, sqlx::FromRow)]
struct NewsRow {
    raw_news_id: i64,
    url: String,
    header: Option<String>,
    text: String,
    news_creation_time: Option<NaiveDateTime>,
    sport_id: Option<i64>,
    pipeline_status: String,
    pipeline_update_time: Option<NaiveDateTime>,
}

impl From<NewsRow> for Stored {
    fn from(row: NewsRow) -> Self {
        Stored {
            id: row.raw_news_id,
            entity: Entity::RawNews(RawNews {
                url: row.url,
                header: row.header,
                text: row.text,
                news_creation_time: row.news_creation_time,
                sport_id: row.sport_id,
                pipeline_status: PipelineStatus::parse(&row.pipeline_status)
                    .unwrap_or(PipelineStatus::New),
                pipeline_update_time: row.pipeline_update_time,
            }),
        }
    }
}

fn table_for(kind: EntityKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        EntityKind::Match => ("match", "match_id", MATCH_COLUMNS),
        EntityKind::Team => ("team", "team_id", TEAM_COLUMNS),
        EntityKind::TeamMember => ("team_member", "team_member_id", MEMBER_COLUMNS),
        EntityKind::Competition => ("competition", "competition_id", COMPETITION_COLUMNS),
        EntityKind::RawNews => ("raw_news", "raw_news_id", NEWS_COLUMNS),
    }
}

fn key_column(key: &EntityKey) -> &'static str {
    match key {
        EntityKey::MatchExternalId(_) => "external_id",
        EntityKey::TeamName(_) => "name",
        EntityKey::TeamUrl(_) => "team_url",
        EntityKey::CompetitionName(_) => "name",
        EntityKey::MemberUrl(_) => "team_member_url",
        EntityKey::NewsUrl(_) => "url",
    }
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn begin(&self) -> Result<Box<dyn GatewayTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(map_err)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn find_sport(&self, name: &str) -> Result<Option<Sport>, StoreError> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT sport_id, name FROM sport WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(row.map(|(sport_id, name)| Sport { sport_id, name }))
    }

    async fn matches_missing_competition(&self, sport_id: Option<i64>) -> Result<Vec<SweepTarget>, StoreError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            r#"
            SELECT match_id, external_id, tournament_url
            FROM match
            WHERE competition_id IS NULL
              AND tournament_url IS NOT NULL
              AND ($1::BIGINT IS NULL OR sport_id = $1)
            ORDER BY match_id
            "#,
        )
        .bind(sport_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(rows
            .into_iter()
            .map(|(match_id, external_id, url)| SweepTarget { match_id, external_id, url })
            .collect())
    }

    async fn active_matches(&self, sport_id: Option<i64>) -> Result<Vec<SweepTarget>, StoreError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            r#"
            SELECT m.match_id, m.external_id, m.match_url
            FROM match m
            JOIN match_status s ON s.match_id = m.match_id
            WHERE s.name IN ('scheduled', 'live')
              AND m.match_url IS NOT NULL
              AND ($1::BIGINT IS NULL OR m.sport_id = $1)
            ORDER BY m.planned_start_datetime NULLS LAST, m.match_id
            "#,
        )
        .bind(sport_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(rows
            .into_iter()
            .map(|(match_id, external_id, url)| SweepTarget { match_id, external_id, url })
            .collect())
    }

    async fn known_news_urls(&self, urls: &[String]) -> Result<Vec<String>, StoreError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM raw_news WHERE url = ANY($1)")
            .bind(urls)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn fetch_stored(&mut self, kind: EntityKind, column: &str, value: SqlValue<'_>) -> Result<Option<Stored>, StoreError> {
        let (table, _, columns) = table_for(kind);
        // Row lock held until commit so concurrent merges of one key serialize.
        let sql = format!("SELECT {} FROM {} WHERE {} = $1 FOR UPDATE", columns, table, column);
        macro_rules! fetch {
            ($row:ty) => {{
                let query = sqlx::query_as::<_, $row>(&sql);
                let query = match value {
                    SqlValue::Text(v) => query.bind(v.to_string()),
                    SqlValue::Id(v) => query.bind(v),
                };
                query
                    .fetch_optional(&mut *self.tx)
                    .await
                    .map_err(map_err)?
                    .map(Stored::from)
            }};
        }
        Ok(match kind {
            EntityKind::Match => fetch!(MatchRow),
            EntityKind::Team => fetch!(TeamRow),
            EntityKind::TeamMember => fetch!(MemberRow),
            EntityKind::Competition => fetch!(CompetitionRow),
            EntityKind::RawNews => fetch!(NewsRow),
        })
    }
}

#[derive(Clone, Copy)]
enum SqlValue<'a> {
    Text(&'a str),
    Id(i64),
}

#[async_trait]
impl GatewayTx for PgTx {
    async fn find_by_key(&mut self, key: &EntityKey) -> Result<Option<Stored>, StoreError> {
        self.fetch_stored(key.kind(), key_column(key), SqlValue::Text(key.value()))
            .await
    }

    async fn get(&mut self, kind: EntityKind, id: i64) -> Result<Option<Stored>, StoreError> {
        let (_, id_column, _) = table_for(kind);
        self.fetch_stored(kind, id_column, SqlValue::Id(id)).await
    }

    async fn create(&mut self, entity: &Entity) -> Result<i64, StoreError> {
        let id: (i64,) = match entity {
            Entity::Match(m) => sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO match (external_id, match_name, pretty_match_name, match_url,
                                   tournament_url, planned_start_datetime, streams, sport_id,
                                   competition_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING match_id
                "#,
            )
            .bind(&m.external_id)
            .bind(&m.match_name)
            .bind(&m.pretty_match_name)
            .bind(&m.match_url)
            .bind(&m.tournament_url)
            .bind(m.planned_start_datetime)
            .bind(Json(&m.streams))
            .bind(m.sport_id)
            .bind(m.competition_id)
            .fetch_one(&mut *self.tx)
            .await,
            Entity::Team(t) => sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO team (name, pretty_name, team_url, image_url, region, stats, regalia)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING team_id
                "#,
            )
            .bind(&t.name)
            .bind(&t.pretty_name)
            .bind(&t.team_url)
            .bind(&t.image_url)
            .bind(&t.region)
            .bind(Json(&t.stats))
            .bind(Json(&t.regalia))
            .fetch_one(&mut *self.tx)
            .await,
            Entity::TeamMember(m) => sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO team_member (team_member_url, nickname, name, age, country, image_url, stats)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING team_member_id
                "#,
            )
            .bind(&m.team_member_url)
            .bind(&m.nickname)
            .bind(&m.name)
            .bind(m.age.and_then(|a| i32::try_from(a).ok()))
            .bind(&m.country)
            .bind(&m.image_url)
            .bind(Json(&m.stats))
            .fetch_one(&mut *self.tx)
            .await,
            Entity::Competition(c) => sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO competition (name, description, prize_pool, location, start_date,
                                         image_url, sport_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING competition_id
                "#,
            )
            .bind(&c.name)
            .bind(&c.description)
            .bind(&c.prize_pool)
            .bind(&c.location)
            .bind(c.start_date)
            .bind(&c.image_url)
            .bind(c.sport_id)
            .fetch_one(&mut *self.tx)
            .await,
            Entity::RawNews(n) => sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO raw_news (url, header, text, news_creation_time, sport_id,
                                      pipeline_status, pipeline_update_time)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING raw_news_id
                "#,
            )
            .bind(&n.url)
            .bind(&n.header)
            .bind(&n.text)
            .bind(n.news_creation_time)
            .bind(n.sport_id)
            .bind(n.pipeline_status.as_str())
            .bind(n.pipeline_update_time)
            .fetch_one(&mut *self.tx)
            .await,
        }
        .map_err(map_err)?;
        Ok(id.0)
    }

    async fn update(&mut self, id: i64, entity: &Entity) -> Result<(), StoreError> {
        let result = match entity {
            Entity::Match(m) => sqlx::query(
                r#"
                UPDATE match
                SET match_name = $2, pretty_match_name = $3, match_url = $4, tournament_url = $5,
                    planned_start_datetime = $6, streams = $7, sport_id = $8, updated_at = NOW()
                WHERE match_id = $1
                "#,
            )
            .bind(id)
            .bind(&m.match_name)
            .bind(&m.pretty_match_name)
            .bind(&m.match_url)
            .bind(&m.tournament_url)
            .bind(m.planned_start_datetime)
            .bind(Json(&m.streams))
            .bind(m.sport_id)
            .execute(&mut *self.tx)
            .await,
            Entity::Team(t) => sqlx::query(
                r#"
                UPDATE team
                SET pretty_name = $2, team_url = $3, image_url = $4, region = $5, stats = $6,
                    regalia = $7, updated_at = NOW()
                WHERE team_id = $1
                "#,
            )
            .bind(id)
            .bind(&t.pretty_name)
            .bind(&t.team_url)
            .bind(&t.image_url)
            .bind(&t.region)
            .bind(Json(&t.stats))
            .bind(Json(&t.regalia))
            .execute(&mut *self.tx)
            .await,
            Entity::TeamMember(m) => sqlx::query(
                r#"
                UPDATE team_member
                SET nickname = $2, name = $3, age = $4, country = $5, image_url = $6, stats = $7,
                    updated_at = NOW()
                WHERE team_member_id = $1
                "#,
            )
            .bind(id)
            .bind(&m.nickname)
            .bind(&m.name)
            .bind(m.age.and_then(|a| i32::try_from(a).ok()))
            .bind(&m.country)
            .bind(&m.image_url)
            .bind(Json(&m.stats))
            .execute(&mut *self.tx)
            .await,
            Entity::Competition(c) => sqlx::query(
                r#"
                UPDATE competition
                SET description = $2, prize_pool = $3, location = $4, start_date = $5,
                    image_url = $6, sport_id = $7, updated_at = NOW()
                WHERE competition_id = $1
                "#,
            )
            .bind(id)
            .bind(&c.description)
            .bind(&c.prize_pool)
            .bind(&c.location)
            .bind(c.start_date)
            .bind(&c.image_url)
            .bind(c.sport_id)
            .execute(&mut *self.tx)
            .await,
            Entity::RawNews(n) => sqlx::query(
                r#"
                UPDATE raw_news
                SET header = $2, text = $3, news_creation_time = $4, sport_id = $5,
                    pipeline_status = $6, pipeline_update_time = $7
                WHERE raw_news_id = $1
                "#,
            )
            .bind(id)
            .bind(&n.header)
            .bind(&n.text)
            .bind(n.news_creation_time)
            .bind(n.sport_id)
            .bind(n.pipeline_status.as_str())
            .bind(n.pipeline_update_time)
            .execute(&mut *self.tx)
            .await,
        }
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: entity.kind(),
                id,
            });
        }
        Ok(())
    }

    async fn attach_relationship(&mut self, relation: Relation) -> Result<Attach, StoreError> {
        match relation {
            Relation::MatchTeam { match_id, team_id, slot } => {
                let rows: Vec<(i16, i64)> =
                    sqlx::query_as("SELECT slot, team_id FROM match_team WHERE match_id = $1 FOR UPDATE")
                        .bind(match_id)
                        .fetch_all(&mut *self.tx)
                        .await
                        .map_err(map_err)?;
                let occupant = rows
                    .iter()
                    .find(|(s, _)| *s == slot.as_i16())
                    .map(|(_, team)| *team);
                if occupant == Some(team_id) {
                    return Ok(Attach::AlreadyPresent);
                }
                sqlx::query("DELETE FROM match_team WHERE match_id = $1 AND (slot = $2 OR team_id = $3)")
                    .bind(match_id)
                    .bind(slot.as_i16())
                    .bind(team_id)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(map_err)?;
                sqlx::query("INSERT INTO match_team (match_id, team_id, slot) VALUES ($1, $2, $3)")
                    .bind(match_id)
                    .bind(team_id)
                    .bind(slot.as_i16())
                    .execute(&mut *self.tx)
                    .await
                    .map_err(map_err)?;
                Ok(match occupant {
                    Some(previous) => Attach::Replaced { previous },
                    None => Attach::Added,
                })
            }
            Relation::MatchCompetition { match_id, competition_id } => {
                let current: Option<(Option<i64>,)> =
                    sqlx::query_as("SELECT competition_id FROM match WHERE match_id = $1 FOR UPDATE")
                        .bind(match_id)
                        .fetch_optional(&mut *self.tx)
                        .await
                        .map_err(map_err)?;
                let Some((current,)) = current else {
                    return Err(StoreError::NotFound {
                        kind: EntityKind::Match,
                        id: match_id,
                    });
                };
                match current {
                    Some(existing) if existing == competition_id => return Ok(Attach::AlreadyPresent),
                    Some(existing) => return Ok(Attach::Kept { existing }),
                    None => {}
                }
                let result = sqlx::query(
                    "UPDATE match SET competition_id = $2, updated_at = NOW() WHERE match_id = $1 AND competition_id IS NULL",
                )
                .bind(match_id)
                .bind(competition_id)
                .execute(&mut *self.tx)
                .await
                .map_err(map_err)?;
                Ok(inserted(result.rows_affected()))
            }
            Relation::TeamCompetition { team_id, competition_id } => {
                let result = sqlx::query(
                    "INSERT INTO team_competition (team_id, competition_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(team_id)
                .bind(competition_id)
                .execute(&mut *self.tx)
                .await
                .map_err(map_err)?;
                Ok(inserted(result.rows_affected()))
            }
            Relation::TeamMember { team_id, member_id } => {
                let result = sqlx::query(
                    "INSERT INTO team_member_link (team_id, team_member_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(team_id)
                .bind(member_id)
                .execute(&mut *self.tx)
                .await
                .map_err(map_err)?;
                Ok(inserted(result.rows_affected()))
            }
        }
    }

    async fn match_teams(&mut self, match_id: i64) -> Result<[Option<i64>; 2], StoreError> {
        let rows: Vec<(i16, i64)> = sqlx::query_as("SELECT slot, team_id FROM match_team WHERE match_id = $1")
            .bind(match_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_err)?;
        let mut slots = [None, None];
        for (slot, team_id) in rows {
            if let Some(entry) = usize::try_from(slot - 1).ok().and_then(|i| slots.get_mut(i)) {
                *entry = Some(team_id);
            }
        }
        Ok(slots)
    }

    async fn match_status(&mut self, match_id: i64) -> Result<Option<MatchStatus>, StoreError> {
        let row: Option<(String, Json<StatusPayload>)> =
            sqlx::query_as("SELECT name, status FROM match_status WHERE match_id = $1 FOR UPDATE")
                .bind(match_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_err)?;
        Ok(row.and_then(|(name, status)| {
            MatchStatusKind::from_label(&name).map(|name| MatchStatus { name, status: status.0 })
        }))
    }

    async fn put_match_status(&mut self, match_id: i64, status: &MatchStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO match_status (match_id, name, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (match_id) DO UPDATE
            SET name = EXCLUDED.name, status = EXCLUDED.status, updated_at = NOW()
            "#,
        )
        .bind(match_id)
        .bind(status.name.as_str())
        .bind(Json(&status.status))
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_err)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_err)
    }
}

fn inserted(rows_affected: u64) -> Attach {
    if rows_affected > 0 {
        Attach::Added
    } else {
        Attach::AlreadyPresent
    }
}

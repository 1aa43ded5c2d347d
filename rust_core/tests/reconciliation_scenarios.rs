//! End-to-end reconciliation scenarios driven through the in-memory store.

mod common;

use esports_rust_core::db::{Entity, EntityKey, EntityKind, InMemoryGateway, PersistenceGateway};
use esports_rust_core::models::{
    MatchStatusKind, PipelineStatus, RawFields, RawRecord, Record, RecordKind, Team, DEFAULT_SPORT,
};
use esports_rust_core::normalize::Normalizer;
use esports_rust_core::placeholder::TournamentRunCache;
use esports_rust_core::reconcile::{
    EngineConfig, ReconcileError, ReconciliationEngine, RecordOutcome, RunContext,
};
use futures_util::future::join_all;
use std::sync::Arc;

const MATCHES: &str = "https://escorenews.com/en/csgo/matches";

struct Harness {
    gateway: InMemoryGateway,
    engine: ReconciliationEngine,
    normalizer: Normalizer,
    ctx: RunContext,
}

impl Harness {
    async fn new() -> Self {
        common::init_logging();
        let gateway = InMemoryGateway::new();
        let sport = gateway.find_sport(DEFAULT_SPORT).await.unwrap().unwrap();
        Self {
            engine: ReconciliationEngine::new(Arc::new(gateway.clone()), EngineConfig::default()),
            normalizer: Normalizer::default(),
            ctx: RunContext::new(Some(sport.sport_id), Arc::new(TournamentRunCache::new())),
            gateway,
        }
    }

    async fn apply(&self, kind: RecordKind, fields: RawFields) -> Result<RecordOutcome, ReconcileError> {
        let record = self.normalizer.normalize(&RawRecord::new(kind, fields));
        self.engine.apply(&record, &self.ctx).await
    }

    async fn id_of(&self, key: EntityKey) -> Option<i64> {
        self.gateway.find(&key).await.map(|stored| stored.id)
    }

    async fn team_id(&self, name: &str) -> Option<i64> {
        self.id_of(EntityKey::TeamName(name.to_string())).await
    }

    async fn match_id(&self, external_id: &str) -> i64 {
        self.id_of(EntityKey::MatchExternalId(external_id.to_string()))
            .await
            .unwrap()
    }

    async fn competition_of(&self, external_id: &str) -> Option<i64> {
        self.gateway
            .find(&EntityKey::MatchExternalId(external_id.to_string()))
            .await
            .and_then(|stored| stored.entity.as_match().and_then(|m| m.competition_id))
    }
}

fn match_page(path: &str) -> RawFields {
    RawFields::new().with_text("match_url", &format!("{}/{}", MATCHES, path))
}

fn with_tournament(fields: RawFields, name: &str) -> RawFields {
    fields
        .with_text("has_tournament_info", "true")
        .with_text("tournament_name", name)
        .with_list("tournament_description", &["Premier", "event"])
        .with_text("tournament_prize_pool", "$1,000,000")
        .with_text("tournament_url", "/en/csgo/tournament/iem-katowice-2024")
}

#[tokio::test]
async fn test_applying_a_record_twice_changes_nothing() {
    let h = Harness::new().await;
    let page = with_tournament(match_page("teamA-vs-teamB-12345"), "IEM Katowice 2024")
        .with_text("match_status", "Match started")
        .with_text("match_score", "1:0");

    assert_eq!(h.apply(RecordKind::MatchPage, page.clone()).await.unwrap(), RecordOutcome::Created);
    assert_eq!(h.apply(RecordKind::MatchPage, page).await.unwrap(), RecordOutcome::Unchanged);
    assert_eq!(h.gateway.count(EntityKind::Match).await, 1);
    assert_eq!(h.gateway.count(EntityKind::Team).await, 2);
    assert_eq!(h.gateway.count(EntityKind::Competition).await, 1);
}

#[tokio::test]
async fn test_late_tournament_attaches_match_and_teams() {
    let h = Harness::new().await;

    h.apply(RecordKind::MatchPage, match_page("teamA-vs-teamB-12345"))
        .await
        .unwrap();
    assert_eq!(h.competition_of("12345").await, None);

    let outcome = h
        .apply(
            RecordKind::MatchPage,
            with_tournament(match_page("teamA-vs-teamB-12345"), "IEM Katowice 2024"),
        )
        .await
        .unwrap();
    assert_eq!(outcome, RecordOutcome::Updated);

    let competition = h
        .id_of(EntityKey::CompetitionName("IEM Katowice 2024".into()))
        .await
        .unwrap();
    assert_eq!(h.competition_of("12345").await, Some(competition));
    for team in ["teama", "teamb"] {
        let team_id = h.team_id(team).await.unwrap();
        assert_eq!(h.gateway.competitions_of_team(team_id).await, vec![competition]);
    }
}

#[tokio::test]
async fn test_placeholder_slot_is_filled_later_without_a_tbd_team() {
    let h = Harness::new().await;
    let tbd = match_page("tbd-vs-astralis-555")
        .with_text("team1", "TBD")
        .with_text("team1_page_link", "javascript:;")
        .with_text("pretty_team1_name", "TBD")
        .with_text("team2", "astralis")
        .with_text("pretty_team2_name", "Astralis");

    h.apply(RecordKind::MatchPage, tbd.clone()).await.unwrap();
    let astralis = h.team_id("astralis").await.unwrap();
    let match_id = h.match_id("555").await;
    assert_eq!(h.gateway.teams_of_match(match_id).await, [None, Some(astralis)]);

    let known = match_page("natus-vincere-vs-astralis-555")
        .with_text("team1", "natus-vincere")
        .with_text("pretty_team1_name", "NAVI")
        .with_text("team1_page_link", "/en/csgo/team/natus-vincere")
        .with_text("team2", "astralis");
    h.apply(RecordKind::MatchPage, known).await.unwrap();
    let navi = h.team_id("natus-vincere").await.unwrap();
    assert_eq!(h.gateway.teams_of_match(match_id).await, [Some(navi), Some(astralis)]);

    // a stale page still showing the placeholder reverts nothing
    h.apply(RecordKind::MatchPage, tbd).await.unwrap();
    assert_eq!(h.gateway.teams_of_match(match_id).await, [Some(navi), Some(astralis)]);
    assert_eq!(h.team_id("tbd").await, None);
    assert_eq!(h.gateway.count(EntityKind::Team).await, 2);

    let stored = h.gateway.find(&EntityKey::TeamName("natus-vincere".into())).await.unwrap();
    assert_eq!(stored.entity.as_team().unwrap().pretty_name.as_deref(), Some("NAVI"));
}

#[tokio::test]
async fn test_listing_with_two_placeholders_is_skipped() {
    let h = Harness::new().await;
    let outcome = h
        .apply(
            RecordKind::MatchListing,
            RawFields::new().with_text("match_url", &format!("{}/tbd-vs-tbd-777", MATCHES)),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, RecordOutcome::Skipped(_)));
    assert_eq!(h.gateway.count(EntityKind::Match).await, 0);
}

#[tokio::test]
async fn test_status_moves_forward_only() {
    let h = Harness::new().await;
    let listing = |status: &str| {
        RawFields::new()
            .with_text("match_url", &format!("{}/a-vs-b-42", MATCHES))
            .with_text("match_status", status)
    };

    h.apply(RecordKind::MatchListing, listing("Match did not start")).await.unwrap();
    let match_id = h.match_id("42").await;
    assert_eq!(h.gateway.status_of(match_id).await.unwrap().name, MatchStatusKind::Scheduled);

    h.apply(
        RecordKind::MatchPage,
        match_page("a-vs-b-42")
            .with_text("match_status", "Match started")
            .with_text("team1_score", "1")
            .with_text("team2_score", "0"),
    )
    .await
    .unwrap();
    let live = h.gateway.status_of(match_id).await.unwrap();
    assert_eq!(live.name, MatchStatusKind::Live);
    assert_eq!((live.status.team1_score, live.status.team2_score), (Some(1), Some(0)));

    h.apply(
        RecordKind::PastMatch,
        RawFields::new()
            .with_text("external_id", "42")
            .with_text("match_score", "2 : 1"),
    )
    .await
    .unwrap();
    let finished = h.gateway.status_of(match_id).await.unwrap();
    assert_eq!(finished.name, MatchStatusKind::Finished);
    assert_eq!(finished.status.team1_score, Some(2));

    // a stale listing row cannot move the match back
    let outcome = h.apply(RecordKind::MatchListing, listing("Match did not start")).await.unwrap();
    assert_eq!(outcome, RecordOutcome::Unchanged);
    assert_eq!(h.gateway.status_of(match_id).await.unwrap(), finished);
}

#[tokio::test]
async fn test_dash_age_is_unknown() {
    let h = Harness::new().await;
    h.apply(
        RecordKind::Player,
        RawFields::new()
            .with_text("team_member_url", "/en/csgo/player/s1mple")
            .with_text("player_nickname", "s1mple")
            .with_text("player_age", "-"),
    )
    .await
    .unwrap();
    let stored = h
        .gateway
        .find(&EntityKey::MemberUrl("https://escorenews.com/en/csgo/player/s1mple".into()))
        .await
        .unwrap();
    assert_eq!(stored.entity.as_member().unwrap().age, None);
}

#[tokio::test]
async fn test_shared_tournament_is_created_once_per_run() {
    let h = Harness::new().await;
    for id in 1..=5 {
        let page = with_tournament(match_page(&format!("a{id}-vs-b{id}-{id}")), "IEM Katowice 2024");
        h.apply(RecordKind::MatchPage, page).await.unwrap();
    }

    assert_eq!(h.gateway.count(EntityKind::Competition).await, 1);
    let stats = h.ctx.tournaments.stats();
    assert_eq!((stats.hits, stats.misses), (4, 1));
    let competition = h.competition_of("1").await;
    assert!(competition.is_some());
    for id in 2..=5 {
        assert_eq!(h.competition_of(&id.to_string()).await, competition);
    }
}

#[tokio::test]
async fn test_cached_tournament_still_takes_later_details() {
    let h = Harness::new().await;
    let bare = match_page("a1-vs-b1-1")
        .with_text("has_tournament_info", "true")
        .with_text("tournament_name", "IEM Katowice 2024");
    h.apply(RecordKind::MatchPage, bare).await.unwrap();

    let detailed = match_page("a2-vs-b2-2")
        .with_text("has_tournament_info", "true")
        .with_text("tournament_name", "IEM Katowice 2024")
        .with_text("tournament_prize_pool", "$1,000,000")
        .with_text("tournament_location", "Katowice");
    h.apply(RecordKind::MatchPage, detailed).await.unwrap();

    assert_eq!(h.ctx.tournaments.stats().hits, 1);
    assert_eq!(h.gateway.count(EntityKind::Competition).await, 1);
    let stored = h
        .gateway
        .find(&EntityKey::CompetitionName("IEM Katowice 2024".into()))
        .await
        .unwrap();
    let competition = stored.entity.as_competition().unwrap();
    assert_eq!(competition.prize_pool.as_deref(), Some("$1,000,000"));
    assert_eq!(competition.location.as_deref(), Some("Katowice"));
    assert_eq!(h.competition_of("1").await, Some(stored.id));
    assert_eq!(h.competition_of("2").await, Some(stored.id));
}

#[tokio::test]
async fn test_concurrent_records_for_one_team_keep_every_stat() {
    let h = Harness::new().await;
    let stats = ["maps played", "wins", "losses", "k/d ratio", "rounds played", "world ranking"];
    let records = stats.iter().enumerate().map(|(i, stat)| {
        let value = i.to_string();
        let fields = RawFields::new()
            .with_text("team_name", "natus-vincere")
            .with_table("stats", &[(*stat, &[value.as_str()])]);
        h.apply(RecordKind::Team, fields)
    });

    let outcomes = join_all(records).await;
    let created = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(RecordOutcome::Created)))
        .count();
    assert_eq!(created, 1);
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(h.gateway.count(EntityKind::Team).await, 1);

    let stored = h.gateway.find(&EntityKey::TeamName("natus-vincere".into())).await.unwrap();
    let team = stored.entity.as_team().unwrap();
    assert_eq!(team.stats.len(), stats.len());
    for (i, stat) in stats.iter().enumerate() {
        assert_eq!(team.stats.get(*stat), Some(&i.to_string()));
    }
}

#[tokio::test]
async fn test_tournament_record_backfills_stored_match() {
    let h = Harness::new().await;
    h.apply(RecordKind::MatchPage, match_page("x-vs-y-900")).await.unwrap();

    let tournament = RawFields::new()
        .with_text("match_external_id", "900")
        .with_text("tournament_name", "BLAST Premier")
        .with_text("tournament_location", "Online");
    assert_eq!(
        h.apply(RecordKind::Tournament, tournament.clone()).await.unwrap(),
        RecordOutcome::Updated
    );
    assert_eq!(h.apply(RecordKind::Tournament, tournament).await.unwrap(), RecordOutcome::Unchanged);
    assert!(h.competition_of("900").await.is_some());

    // a different tournament for the same match keeps the first link
    let other = RawFields::new()
        .with_text("match_external_id", "900")
        .with_text("tournament_name", "ESL Pro League");
    h.apply(RecordKind::Tournament, other).await.unwrap();
    let attached = h.competition_of("900").await;
    assert_eq!(
        attached,
        h.id_of(EntityKey::CompetitionName("BLAST Premier".into())).await
    );
}

#[tokio::test]
async fn test_team_roster_and_player_pages_link_members() {
    let h = Harness::new().await;
    h.apply(
        RecordKind::Team,
        RawFields::new()
            .with_text("team_name", "natus-vincere")
            .with_text("team_pretty_name", "NAVI")
            .with_text("team_page_link", "/en/csgo/team/natus-vincere")
            .with_table(
                "players",
                &[
                    ("s1mple", &["active player", "/en/csgo/player/s1mple", "Ukraine", ""][..]),
                    ("b1t", &["", "/en/csgo/player/b1t", "Ukraine", "/media/logo/nop.svg"][..]),
                ],
            ),
    )
    .await
    .unwrap();
    let navi = h.team_id("natus-vincere").await.unwrap();
    assert_eq!(h.gateway.members_of_team(navi).await.len(), 2);

    // a player page for a new team creates the team on demand
    h.apply(
        RecordKind::Player,
        RawFields::new()
            .with_text("team_member_url", "/en/csgo/player/s1mple")
            .with_text("player_team", "/en/csgo/team/falcons")
            .with_text("player_played_games_overall", "1200"),
    )
    .await
    .unwrap();
    let falcons = h.team_id("falcons").await.unwrap();
    assert_eq!(h.gateway.members_of_team(falcons).await.len(), 1);
    assert_eq!(h.gateway.count(EntityKind::TeamMember).await, 2);

    let s1mple = h
        .gateway
        .find(&EntityKey::MemberUrl("https://escorenews.com/en/csgo/player/s1mple".into()))
        .await
        .unwrap();
    let stats = &s1mple.entity.as_member().unwrap().stats;
    assert_eq!(stats.get("status").map(String::as_str), Some("active player"));
    assert_eq!(stats.get("games_overall").map(String::as_str), Some("1200"));
}

#[tokio::test]
async fn test_past_match_links_only_known_teams() {
    let h = Harness::new().await;
    h.apply(RecordKind::Team, RawFields::new().with_text("team_name", "vitality"))
        .await
        .unwrap();
    h.apply(
        RecordKind::PastMatch,
        RawFields::new()
            .with_text("match_url", &format!("{}/vitality-vs-mouz-31", MATCHES))
            .with_text("team1", "Vitality")
            .with_text("team2", "MOUZ")
            .with_text("match_score", "2:0"),
    )
    .await
    .unwrap();

    let vitality = h.team_id("vitality").await;
    assert_eq!(h.gateway.teams_of_match(h.match_id("31").await).await, [vitality, None]);
    assert_eq!(h.team_id("mouz").await, None);
}

#[tokio::test]
async fn test_unique_race_converges_to_update() {
    let h = Harness::new().await;
    h.gateway.inject_unique_race(Entity::Team(Team {
        name: "astralis".into(),
        ..Default::default()
    }));

    let outcome = h
        .apply(
            RecordKind::Team,
            RawFields::new()
                .with_text("team_name", "astralis")
                .with_text("team_region", "Denmark"),
        )
        .await
        .unwrap();
    assert_eq!(outcome, RecordOutcome::Updated);
    assert_eq!(h.gateway.count(EntityKind::Team).await, 1);
    let stored = h.gateway.find(&EntityKey::TeamName("astralis".into())).await.unwrap();
    assert_eq!(stored.entity.as_team().unwrap().region.as_deref(), Some("Denmark"));
}

#[tokio::test]
async fn test_store_fault_rolls_back_one_record_only() {
    let h = Harness::new().await;
    h.gateway.inject_fault(EntityKey::TeamName("broken".into()));

    let failed = h
        .apply(RecordKind::Team, RawFields::new().with_text("team_name", "broken"))
        .await;
    assert!(matches!(failed, Err(ReconcileError::Store { .. })));

    let ok = h
        .apply(RecordKind::Team, RawFields::new().with_text("team_name", "fine"))
        .await
        .unwrap();
    assert_eq!(ok, RecordOutcome::Created);
    assert_eq!(h.gateway.count(EntityKind::Team).await, 1);
    assert_eq!(h.team_id("broken").await, None);
}

#[tokio::test]
async fn test_news_recrawl_keeps_processed_flag() {
    let h = Harness::new().await;
    let url = "https://www.hltv.org/news/40000/major-recap";
    let article = |text: &str| {
        RawFields::new()
            .with_text("url", url)
            .with_text("header", "Major recap")
            .with_list("text", &[text])
            .with_text("news_creation_time", "1731600000000")
    };

    assert_eq!(h.apply(RecordKind::News, article("first draft")).await.unwrap(), RecordOutcome::Created);
    assert!(h.gateway.mark_news(url, PipelineStatus::Processed).await);

    h.apply(RecordKind::News, article("edited")).await.unwrap();
    let stored = h.gateway.find(&EntityKey::NewsUrl(url.into())).await.unwrap();
    let news = stored.entity.as_news().unwrap();
    assert_eq!(news.pipeline_status, PipelineStatus::Processed);
    assert_eq!(news.text, "edited");
    assert!(news.news_creation_time.is_some());
}

#[tokio::test]
async fn test_site_datetime_matches_iso_parse() {
    let h = Harness::new().await;
    let listing = RawFields::new()
        .with_text("match_url", &format!("{}/a-vs-b-1", MATCHES))
        .with_text("planned_start_datetime", "2024-08-15 18:00:00");
    let Record::MatchListing(record) = h.normalizer.normalize(&RawRecord::new(RecordKind::MatchListing, listing)) else {
        panic!("expected listing");
    };
    let iso: chrono::NaiveDateTime = "2024-08-15T18:00:00".parse().unwrap();
    assert_eq!(record.planned_start, Some(iso));

    h.engine
        .apply(&Record::MatchListing(record), &h.ctx)
        .await
        .unwrap();
    let stored = h.gateway.find(&EntityKey::MatchExternalId("1".into())).await.unwrap();
    assert_eq!(stored.entity.as_match().unwrap().planned_start_datetime, Some(iso));
}

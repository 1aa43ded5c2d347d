//! Record normalizer: raw extracted fields to typed [`Record`]s.
//!
//! Normalization never fails. Anything that cannot be parsed becomes an
//! unknown (`None`) value and is left to the identity resolver and the
//! reconciliation engine to deal with.

use crate::identity::{teams_from_match_url, TBD};
use crate::models::{
    Accomplishment, MatchListingRecord, MatchPageRecord, MatchStatusKind, NewsRecord,
    PastMatchRecord, PlayerRecord, RawFields, RawRecord, Record, RecordKind, RosterEntry,
    StatusPayload, StreamInfo, TeamRecord, TeamSlot, TournamentInfo, TournamentRecord,
};
use crate::utils::text::{
    clean_field, join_fragments, last_path_segment, non_empty, normalize_age,
    normalize_match_format, parse_count, parse_datetime, parse_score, parse_unix_millis,
    resolve_url, split_score, unescape_html, clean_text,
};
use reqwest::Url;
use std::collections::BTreeMap;

pub const DEFAULT_BASE_URL: &str = "https://escorenews.com";
pub const DEFAULT_NEWS_BASE_URL: &str = "https://www.hltv.org";

/// Format shown when the score header has none.
pub const DEFAULT_MATCH_FORMAT: &str = "Best of 1";
/// Roster status when the team page shows none.
pub const DEFAULT_ROSTER_STATUS: &str = "active player";

const TEAM_LOGO_SENTINEL: &str = "/media/logo/not.svg";
const PLAYER_PHOTO_SENTINEL: &str = "/media/logo/nop.svg";

#[derive(Debug, Clone)]
pub struct Normalizer {
    base_url: String,
    news_base_url: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_NEWS_BASE_URL)
    }
}

impl Normalizer {
    pub fn new(base_url: &str, news_base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            news_base_url: news_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn news_base_url(&self) -> &str {
        &self.news_base_url
    }

    pub fn normalize(&self, raw: &RawRecord) -> Record {
        let f = &raw.fields;
        match raw.kind {
            RecordKind::MatchListing => Record::MatchListing(self.match_listing(f)),
            RecordKind::MatchPage => Record::MatchPage(self.match_page(f)),
            RecordKind::PastMatch => Record::PastMatch(self.past_match(f)),
            RecordKind::Tournament => Record::Tournament(self.tournament(f)),
            RecordKind::Team => Record::Team(self.team(f)),
            RecordKind::Player => Record::Player(self.player(f)),
            RecordKind::News => Record::News(self.news(f)),
        }
    }

    // ------------------------------------------------------------------------
    // Field helpers
    // ------------------------------------------------------------------------

    fn link(&self, f: &RawFields, name: &str) -> Option<String> {
        link_against(&self.base_url, f.text(name))
    }

    /// Link that is unknown when it points at the site root.
    fn page_link(&self, f: &RawFields, name: &str) -> Option<String> {
        self.link(f, name).filter(|url| !is_site_root(url))
    }

    fn status(f: &RawFields) -> Option<MatchStatusKind> {
        f.text("match_status").and_then(MatchStatusKind::from_label)
    }

    fn planned_start(f: &RawFields) -> Option<chrono::NaiveDateTime> {
        first_text(f, &["planned_start_datetime", "match_begin_time"]).and_then(parse_datetime)
    }

    fn tournament_info(&self, f: &RawFields) -> TournamentInfo {
        let fragments = f.list("tournament_description");
        let description = clean_field(Some(join_fragments(&fragments).as_str()));
        TournamentInfo {
            name: clean_field(f.text("tournament_name")),
            description,
            prize_pool: clean_field(f.text("tournament_prize_pool")),
            location: clean_field(f.text("tournament_location")),
            start_date: f.text("tournament_start_date").and_then(parse_datetime),
            logo_url: self.page_link(f, "tournament_logo_link"),
            page_url: self.page_link(f, "tournament_url"),
        }
    }

    // ------------------------------------------------------------------------
    // Matches
    // ------------------------------------------------------------------------

    fn match_listing(&self, f: &RawFields) -> MatchListingRecord {
        let match_url = self.link(f, "match_url");
        let match_name = clean_field(f.text("match_name"))
            .or_else(|| match_name_from_url(match_url.as_deref()));
        MatchListingRecord {
            match_url,
            match_name,
            planned_start: Self::planned_start(f),
            status: Self::status(f),
        }
    }

    fn team_slot(&self, f: &RawFields, n: usize, url_slug: Option<&String>) -> TeamSlot {
        let (name_field, alt_name_field) = (format!("team{}", n), format!("team{}_name", n));
        let slug = first_text(f, &[name_field.as_str(), alt_name_field.as_str()])
            .map(|s| match s.contains('/') {
                true => last_path_segment(s).unwrap_or_default(),
                false => s.to_string(),
            })
            .and_then(|s| non_empty(Some(s.as_str())))
            .or_else(|| url_slug.cloned());
        let pretty_name = clean_field(f.text(&format!("pretty_team{}_name", n))).or_else(|| {
            f.list("pretty_team_names")
                .get(n - 1)
                .and_then(|s| clean_field(Some(*s)))
        });
        let (link_field, alt_link_field) = (format!("team{}_page_link", n), format!("team{}_url", n));
        let page_url = first_text(f, &[link_field.as_str(), alt_link_field.as_str()])
            .and_then(|raw| link_against(&self.base_url, Some(raw)));
        let logo_url = self
            .link(f, &format!("team{}_logo_link", n))
            .filter(|url| !url.ends_with(TEAM_LOGO_SENTINEL));
        TeamSlot {
            slug,
            pretty_name,
            page_url,
            logo_url,
        }
    }

    fn streams(f: &RawFields) -> BTreeMap<String, StreamInfo> {
        f.table("match_streams")
            .into_iter()
            .filter_map(|(name, columns)| {
                let name = clean_text(&name);
                if name.is_empty() {
                    return None;
                }
                Some((name, stream_info(&columns)))
            })
            .collect()
    }

    fn match_page(&self, f: &RawFields) -> MatchPageRecord {
        let match_url = self.link(f, "match_url");
        let url_slugs = match_url.as_deref().and_then(teams_from_match_url);
        let teams = [
            self.team_slot(f, 1, url_slugs.as_ref().map(|(a, _)| a)),
            self.team_slot(f, 2, url_slugs.as_ref().map(|(_, b)| b)),
        ];

        let pretty_match_name = clean_field(f.text("pretty_match_name")).or_else(|| {
            let names: Vec<&str> = teams.iter().filter_map(|t| t.pretty_name.as_deref()).collect();
            (names.len() == 2).then(|| names.join(" - "))
        });
        let match_name = clean_field(f.text("match_name"))
            .or_else(|| match_name_from_url(match_url.as_deref()));

        let (team1_score, team2_score) = match (f.text("team1_score"), f.text("team2_score")) {
            (None, None) => f.text("match_score").map(split_score).unwrap_or((None, None)),
            (a, b) => (a.and_then(parse_score), b.and_then(parse_score)),
        };
        let match_format = f
            .text("match_format")
            .and_then(normalize_match_format)
            .or_else(|| Some(DEFAULT_MATCH_FORMAT.to_string()));

        let has_info = f.text("has_tournament_info").map(is_truthy);
        let info = self.tournament_info(f);
        let tournament = match has_info {
            Some(false) => None,
            _ if info.name.is_none() => None,
            _ => Some(info),
        };

        MatchPageRecord {
            match_url,
            match_name,
            pretty_match_name,
            planned_start: Self::planned_start(f),
            status: Self::status(f),
            payload: StatusPayload {
                team1_score,
                team2_score,
                match_format,
            },
            teams,
            streams: Self::streams(f),
            tournament_url: self.page_link(f, "tournament_url"),
            tournament,
        }
    }

    fn past_match(&self, f: &RawFields) -> PastMatchRecord {
        let match_url = self.link(f, "match_url");
        let (team1_score, team2_score) = match (f.text("team1_score"), f.text("team2_score")) {
            (None, None) => f.text("match_score").map(split_score).unwrap_or((None, None)),
            (a, b) => (a.and_then(parse_score), b.and_then(parse_score)),
        };
        PastMatchRecord {
            external_id: non_empty(f.text("external_id")),
            match_name: clean_field(f.text("match_name"))
                .or_else(|| match_name_from_url(match_url.as_deref())),
            match_url,
            date: f.text("date").and_then(parse_datetime),
            team1: clean_field(f.text("team1")),
            team2: clean_field(f.text("team2")),
            team1_score,
            team2_score,
        }
    }

    fn tournament(&self, f: &RawFields) -> TournamentRecord {
        TournamentRecord {
            match_external_id: first_text(f, &["match_external_id", "match_id", "external_id"])
                .and_then(|s| non_empty(Some(s))),
            info: self.tournament_info(f),
        }
    }

    // ------------------------------------------------------------------------
    // Teams & players
    // ------------------------------------------------------------------------

    fn team(&self, f: &RawFields) -> TeamRecord {
        let stats = f
            .table("stats")
            .into_iter()
            .filter_map(|(k, v)| {
                let value = v.first().and_then(|s| clean_field(Some(s.as_str())))?;
                Some((clean_text(&k), value))
            })
            .filter(|(k, _)| !k.is_empty())
            .collect();

        let regalia = f
            .table("regalia")
            .into_iter()
            .filter_map(|(title, columns)| {
                let title = clean_field(Some(title.as_str()))?;
                let column = |i: usize| columns.get(i).and_then(|s| clean_field(Some(s.as_str())));
                Some((
                    title,
                    Accomplishment {
                        place: column(0),
                        earnings: column(1),
                        date: column(2),
                    },
                ))
            })
            .collect();

        let roster = f
            .table("players")
            .into_iter()
            .map(|(nickname, columns)| {
                let column = |i: usize| columns.get(i).map(|s| s.as_str());
                RosterEntry {
                    nickname: clean_field(Some(nickname.as_str())),
                    status: clean_field(column(0))
                        .unwrap_or_else(|| DEFAULT_ROSTER_STATUS.to_string()),
                    profile_url: link_against(&self.base_url, column(1)),
                    country: clean_field(column(2)),
                    photo_url: link_against(&self.base_url, column(3))
                        .filter(|url| !url.ends_with(PLAYER_PHOTO_SENTINEL)),
                }
            })
            .collect();

        TeamRecord {
            slug: non_empty(f.text("team_name")),
            pretty_name: clean_field(f.text("team_pretty_name")),
            page_url: self.link(f, "team_page_link"),
            logo_url: self
                .link(f, "team_logo_link")
                .filter(|url| !url.ends_with(TEAM_LOGO_SENTINEL)),
            region: clean_field(f.text("team_region")),
            stats,
            regalia,
            roster,
        }
    }

    fn player(&self, f: &RawFields) -> PlayerRecord {
        let team_slug = f.text("player_team").and_then(|raw| match raw.contains('/') {
            true => last_path_segment(raw),
            false => non_empty(Some(raw)),
        });
        PlayerRecord {
            profile_url: self.link(f, "team_member_url"),
            nickname: clean_field(f.text("player_nickname")),
            name: clean_field(f.text("player_name")),
            team_slug,
            team_url: self.link(f, "team_page_link"),
            age: f.text("player_age").and_then(normalize_age),
            country: clean_field(f.text("player_country")),
            image_url: self
                .link(f, "image_url")
                .filter(|url| !url.ends_with(PLAYER_PHOTO_SENTINEL)),
            games_last_year: clean_field(f.text("player_played_games_last_year")),
            games_overall: clean_field(f.text("player_played_games_overall")),
            status: clean_field(f.text("player_status")),
        }
    }

    // ------------------------------------------------------------------------
    // News
    // ------------------------------------------------------------------------

    fn news(&self, f: &RawFields) -> NewsRecord {
        let paragraphs: Vec<String> = f
            .list("text")
            .into_iter()
            .map(|p| clean_text(&unescape_html(p)))
            .filter(|p| !p.is_empty())
            .collect();
        let created_at = match f.text("news_creation_time") {
            Some(raw) => parse_unix_millis(raw).or_else(|| parse_datetime(raw)),
            None => None,
        };
        NewsRecord {
            url: link_against(&self.news_base_url, f.text("url")),
            header: clean_field(f.text("header")),
            text: paragraphs.join("\n"),
            created_at,
        }
    }
}

fn first_text<'a>(f: &'a RawFields, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| f.text(name))
        .find(|v| !v.trim().is_empty())
}

fn link_against(base: &str, raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.eq_ignore_ascii_case(TBD) {
        return None;
    }
    resolve_url(base, raw)
}

fn is_site_root(url: &str) -> bool {
    Url::parse(url).map(|u| u.path() == "/").unwrap_or(false)
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn match_name_from_url(url: Option<&str>) -> Option<String> {
    let (team1, team2) = teams_from_match_url(url?)?;
    Some(format!("{} vs {}", team1, team2))
}

/// Stream row: `[author, language, viewers, link]`, or the site's combined
/// `["<language> <author>", viewers, link]`.
fn stream_info(columns: &[String]) -> StreamInfo {
    let column = |i: usize| columns.get(i).and_then(|s| non_empty(Some(s.as_str())));
    if columns.len() >= 4 {
        return StreamInfo {
            author: column(0),
            language: column(1),
            viewers: column(2).as_deref().and_then(parse_count),
            link: column(3),
        };
    }
    let descriptor = columns.first().map(|s| s.as_str()).unwrap_or_default();
    let words: Vec<&str> = descriptor.split_whitespace().collect();
    let (language, author) = match words.as_slice() {
        [] => (None, None),
        [only] => (None, Some(only.to_string())),
        [.., language, author] => (Some(language.to_string()), Some(author.to_string())),
    };
    StreamInfo {
        author,
        language,
        viewers: column(1).as_deref().and_then(parse_count),
        link: column(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn normalize(kind: RecordKind, fields: RawFields) -> Record {
        Normalizer::default().normalize(&RawRecord::new(kind, fields))
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, 0))
            .unwrap()
    }

    #[test]
    fn test_listing_derives_name_from_url() {
        let record = normalize(
            RecordKind::MatchListing,
            RawFields::new()
                .with_text("match_url", "/en/csgo/matches/natus-vincere-vs-team-liquid-551")
                .with_text("match_begin_time", "2024-08-15 18:00:00")
                .with_text("match_status", "Match did not start"),
        );
        let Record::MatchListing(listing) = record else {
            panic!("expected listing");
        };
        assert_eq!(
            listing.match_url.as_deref(),
            Some("https://escorenews.com/en/csgo/matches/natus-vincere-vs-team-liquid-551")
        );
        assert_eq!(listing.match_name.as_deref(), Some("natus-vincere vs team-liquid"));
        assert_eq!(listing.planned_start, Some(at(2024, 8, 15, 18, 0)));
        assert_eq!(listing.status, Some(MatchStatusKind::Scheduled));
    }

    #[test]
    fn test_match_page_full() {
        let record = normalize(
            RecordKind::MatchPage,
            RawFields::new()
                .with_text("match_url", "https://escorenews.com/en/csgo/matches/teama-vs-teamb-12345")
                .with_text("team1", "teama")
                .with_text("team2", "teamb")
                .with_text("team1_page_link", "/en/csgo/team/teama")
                .with_text("team2_page_link", "/en/csgo/team/teamb")
                .with_text("team1_logo_link", "/media/logo/not.svg")
                .with_text("team2_logo_link", "/media/logo/teamb.png")
                .with_list("pretty_team_names", &["Team A", "Team B"])
                .with_text("team1_score", "2")
                .with_text("team2_score", "")
                .with_text("match_format", "Online, Best of 3")
                .with_text("match_status", "Match started")
                .with_table("match_streams", &[("Main", &["EN Pgl", "12 000", "https://www.twitch.tv/pgl"])])
                .with_text("has_tournament_info", "true")
                .with_text("tournament_name", "IEM Katowice 2024")
                .with_list("tournament_description", &["Big event", ". Second part", "and more"])
                .with_text("tournament_start_date", "2024-02-03 00:00:00")
                .with_text("tournament_url", "/en/csgo/tournament/iem-katowice-2024"),
        );
        let Record::MatchPage(page) = record else {
            panic!("expected match page");
        };
        assert_eq!(page.teams[0].slug.as_deref(), Some("teama"));
        assert_eq!(page.teams[0].logo_url, None);
        assert_eq!(
            page.teams[1].logo_url.as_deref(),
            Some("https://escorenews.com/media/logo/teamb.png")
        );
        assert_eq!(page.pretty_match_name.as_deref(), Some("Team A - Team B"));
        assert_eq!(page.payload.team1_score, Some(2));
        assert_eq!(page.payload.team2_score, None);
        assert_eq!(page.payload.match_format.as_deref(), Some("Best of 3"));
        assert_eq!(page.status, Some(MatchStatusKind::Live));
        let stream = &page.streams["Main"];
        assert_eq!(stream.language.as_deref(), Some("EN"));
        assert_eq!(stream.author.as_deref(), Some("Pgl"));
        assert_eq!(stream.viewers, Some(12000));
        let tournament = page.tournament.unwrap();
        assert_eq!(tournament.name.as_deref(), Some("IEM Katowice 2024"));
        assert_eq!(tournament.description.as_deref(), Some("Big event. Second part and more"));
        assert_eq!(tournament.start_date, Some(at(2024, 2, 3, 0, 0)));
    }

    #[test]
    fn test_match_page_defaults_format_and_drops_root_tournament_url() {
        let record = normalize(
            RecordKind::MatchPage,
            RawFields::new()
                .with_text("match_url", "/en/csgo/matches/a-vs-b-1")
                .with_text("match_score", "1:")
                .with_text("tournament_url", "https://escorenews.com/")
                .with_text("has_tournament_info", "false")
                .with_text("tournament_name", "Ignored"),
        );
        let Record::MatchPage(page) = record else {
            panic!("expected match page");
        };
        assert_eq!(page.payload.match_format.as_deref(), Some(DEFAULT_MATCH_FORMAT));
        assert_eq!(page.payload.team1_score, Some(1));
        assert_eq!(page.payload.team2_score, None);
        assert_eq!(page.tournament_url, None);
        assert!(page.tournament.is_none());
        // slots fall back to the slugs in the URL
        assert_eq!(page.teams[1].slug.as_deref(), Some("b"));
    }

    #[test]
    fn test_tbd_links_are_unknown() {
        let record = normalize(
            RecordKind::MatchPage,
            RawFields::new()
                .with_text("team1", "TBD")
                .with_text("team1_page_link", "TBD")
                .with_text("team1_logo_link", "javascript:;"),
        );
        let Record::MatchPage(page) = record else {
            panic!("expected match page");
        };
        assert_eq!(page.teams[0].slug.as_deref(), Some("TBD"));
        assert_eq!(page.teams[0].page_url, None);
        assert_eq!(page.teams[0].logo_url, None);
    }

    #[test]
    fn test_player_dash_age_is_unknown() {
        for dash in ["-", "\u{2013}", "\u{2014}", "â€“"] {
            let record = normalize(
                RecordKind::Player,
                RawFields::new()
                    .with_text("team_member_url", "/en/csgo/player/s1mple")
                    .with_text("player_age", dash),
            );
            let Record::Player(player) = record else {
                panic!("expected player");
            };
            assert_eq!(player.age, None);
        }
    }

    #[test]
    fn test_player_fields() {
        let record = normalize(
            RecordKind::Player,
            RawFields::new()
                .with_text("team_member_url", "/en/csgo/player/s1mple")
                .with_text("player_nickname", " s1mple ")
                .with_text("player_team", "/en/csgo/team/natus-vincere")
                .with_text("player_age", "27")
                .with_text("image_url", "/media/logo/nop.svg")
                .with_text("player_played_games_overall", "1 200"),
        );
        let Record::Player(player) = record else {
            panic!("expected player");
        };
        assert_eq!(player.nickname.as_deref(), Some("s1mple"));
        assert_eq!(player.team_slug.as_deref(), Some("natus-vincere"));
        assert_eq!(player.age, Some(27));
        assert_eq!(player.image_url, None);
        assert_eq!(player.games_overall.as_deref(), Some("1 200"));
    }

    #[test]
    fn test_team_roster_and_regalia() {
        let record = normalize(
            RecordKind::Team,
            RawFields::new()
                .with_text("team_name", "astralis")
                .with_text("team_pretty_name", "Astralis")
                .with_text("team_page_link", "https://escorenews.com/en/csgo/team/astralis")
                .with_table("regalia", &[("Major 2019", &["1", "$500,000", "2019-09-08"])])
                .with_table(
                    "players",
                    &[
                        ("device", &["", "/en/csgo/player/device", "Denmark", "/media/logo/nop.svg"]),
                        ("gla1ve", &["coach", "/en/csgo/player/gla1ve", "Denmark", "/p/gla1ve.png"]),
                    ],
                ),
        );
        let Record::Team(team) = record else {
            panic!("expected team");
        };
        assert_eq!(team.regalia["Major 2019"].earnings.as_deref(), Some("$500,000"));
        let device = team.roster.iter().find(|r| r.nickname.as_deref() == Some("device")).unwrap();
        assert_eq!(device.status, DEFAULT_ROSTER_STATUS);
        assert_eq!(device.photo_url, None);
        assert_eq!(
            device.profile_url.as_deref(),
            Some("https://escorenews.com/en/csgo/player/device")
        );
        let coach = team.roster.iter().find(|r| r.nickname.as_deref() == Some("gla1ve")).unwrap();
        assert_eq!(coach.status, "coach");
    }

    #[test]
    fn test_news_unix_millis_and_body() {
        let record = normalize(
            RecordKind::News,
            RawFields::new()
                .with_text("url", "/news/39000/some-article")
                .with_text("header", "Big &amp; news")
                .with_list("text", &["First\u{2060} paragraph", "", "Second"])
                .with_text("news_creation_time", "1723744800000"),
        );
        let Record::News(news) = record else {
            panic!("expected news");
        };
        assert_eq!(news.url.as_deref(), Some("https://www.hltv.org/news/39000/some-article"));
        assert_eq!(news.header.as_deref(), Some("Big & news"));
        assert_eq!(news.text, "First paragraph\nSecond");
        assert_eq!(news.created_at, Some(at(2024, 8, 15, 18, 0)));
    }

    #[test]
    fn test_news_bad_timestamp_is_unknown() {
        let record = normalize(
            RecordKind::News,
            RawFields::new().with_text("news_creation_time", "yesterday"),
        );
        let Record::News(news) = record else {
            panic!("expected news");
        };
        assert_eq!(news.created_at, None);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let raw = RawRecord::new(
            RecordKind::PastMatch,
            RawFields::new()
                .with_text("external_id", "777")
                .with_text("date", "2024-08-15")
                .with_text("team1", "NAVI")
                .with_text("team1_score", "2")
                .with_text("team2_score", "0"),
        );
        let normalizer = Normalizer::default();
        assert_eq!(normalizer.normalize(&raw), normalizer.normalize(&raw));
    }
}

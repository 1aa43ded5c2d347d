//! Field-level merge rules.
//!
//! A known incoming value overwrites, an unknown one never erases, and
//! mapping fields merge key by key. Natural keys and relationship columns are
//! never touched here.

use crate::db::Entity;
use crate::identity::TBD;
use crate::models::{Competition, Match, RawNews, StatusPayload, Team, TeamMember};
use std::collections::BTreeMap;

pub trait Merge {
    /// `self` updated with everything `incoming` knows.
    fn merged_with(&self, incoming: &Self) -> Self;
}

/// Incoming value wins when it is known and not the placeholder text.
pub fn scalar<T: Clone>(current: &Option<T>, incoming: &Option<T>) -> Option<T> {
    incoming.clone().or_else(|| current.clone())
}

fn text(current: &Option<String>, incoming: &Option<String>) -> Option<String> {
    match incoming {
        Some(value) if !value.trim().is_empty() && !value.trim().eq_ignore_ascii_case(TBD) => {
            Some(value.clone())
        }
        _ => current.clone(),
    }
}

pub fn map<V: Clone>(current: &BTreeMap<String, V>, incoming: &BTreeMap<String, V>) -> BTreeMap<String, V> {
    let mut merged = current.clone();
    merged.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

impl Merge for Match {
    fn merged_with(&self, incoming: &Self) -> Self {
        Match {
            external_id: self.external_id.clone(),
            match_name: text(&self.match_name, &incoming.match_name),
            pretty_match_name: text(&self.pretty_match_name, &incoming.pretty_match_name),
            match_url: text(&self.match_url, &incoming.match_url),
            tournament_url: text(&self.tournament_url, &incoming.tournament_url),
            planned_start_datetime: scalar(&self.planned_start_datetime, &incoming.planned_start_datetime),
            streams: map(&self.streams, &incoming.streams),
            sport_id: scalar(&self.sport_id, &incoming.sport_id),
            competition_id: self.competition_id,
        }
    }
}

impl Merge for Team {
    fn merged_with(&self, incoming: &Self) -> Self {
        Team {
            name: self.name.clone(),
            pretty_name: text(&self.pretty_name, &incoming.pretty_name),
            team_url: text(&self.team_url, &incoming.team_url),
            image_url: text(&self.image_url, &incoming.image_url),
            region: text(&self.region, &incoming.region),
            stats: map(&self.stats, &incoming.stats),
            regalia: map(&self.regalia, &incoming.regalia),
        }
    }
}

impl Merge for TeamMember {
    fn merged_with(&self, incoming: &Self) -> Self {
        TeamMember {
            team_member_url: self.team_member_url.clone(),
            nickname: text(&self.nickname, &incoming.nickname),
            name: text(&self.name, &incoming.name),
            age: scalar(&self.age, &incoming.age),
            country: text(&self.country, &incoming.country),
            image_url: text(&self.image_url, &incoming.image_url),
            stats: map(&self.stats, &incoming.stats),
        }
    }
}

impl Merge for Competition {
    fn merged_with(&self, incoming: &Self) -> Self {
        Competition {
            name: self.name.clone(),
            description: text(&self.description, &incoming.description),
            prize_pool: text(&self.prize_pool, &incoming.prize_pool),
            location: text(&self.location, &incoming.location),
            start_date: scalar(&self.start_date, &incoming.start_date),
            image_url: text(&self.image_url, &incoming.image_url),
            sport_id: scalar(&self.sport_id, &incoming.sport_id),
        }
    }
}

impl Merge for RawNews {
    /// The processing flag and its timestamp belong to the downstream
    /// consumer and survive re-crawls.
    fn merged_with(&self, incoming: &Self) -> Self {
        RawNews {
            url: self.url.clone(),
            header: text(&self.header, &incoming.header),
            text: if incoming.text.trim().is_empty() {
                self.text.clone()
            } else {
                incoming.text.clone()
            },
            news_creation_time: scalar(&self.news_creation_time, &incoming.news_creation_time),
            sport_id: scalar(&self.sport_id, &incoming.sport_id),
            pipeline_status: self.pipeline_status,
            pipeline_update_time: self.pipeline_update_time,
        }
    }
}

impl Merge for StatusPayload {
    fn merged_with(&self, incoming: &Self) -> Self {
        StatusPayload {
            team1_score: scalar(&self.team1_score, &incoming.team1_score),
            team2_score: scalar(&self.team2_score, &incoming.team2_score),
            match_format: text(&self.match_format, &incoming.match_format),
        }
    }
}

impl Merge for Entity {
    /// Entities of different kinds never merge; the current one is kept.
    fn merged_with(&self, incoming: &Self) -> Self {
        match (self, incoming) {
            (Entity::Match(a), Entity::Match(b)) => Entity::Match(a.merged_with(b)),
            (Entity::Team(a), Entity::Team(b)) => Entity::Team(a.merged_with(b)),
            (Entity::TeamMember(a), Entity::TeamMember(b)) => Entity::TeamMember(a.merged_with(b)),
            (Entity::Competition(a), Entity::Competition(b)) => Entity::Competition(a.merged_with(b)),
            (Entity::RawNews(a), Entity::RawNews(b)) => Entity::RawNews(a.merged_with(b)),
            _ => self.clone(),
        }
    }
}

//! Extraction adapter seam.
//!
//! Selectors and browser rendering live in an external extraction service.
//! It receives a fetched page and answers with raw field maps plus the links
//! worth following.

use crate::fetch::Page;
use crate::models::RawRecord;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Which page template the extractor should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    MatchListing,
    MatchPage,
    PastMatchListing,
    TournamentPage,
    TeamListing,
    TeamPage,
    PlayerListing,
    PlayerPage,
    NewsArchive,
    NewsArticle,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::MatchListing => "match_listing",
            PageKind::MatchPage => "match_page",
            PageKind::PastMatchListing => "past_match_listing",
            PageKind::TournamentPage => "tournament_page",
            PageKind::TeamListing => "team_listing",
            PageKind::TeamPage => "team_page",
            PageKind::PlayerListing => "player_listing",
            PageKind::PlayerPage => "player_page",
            PageKind::NewsArchive => "news_archive",
            PageKind::NewsArticle => "news_article",
        }
    }
}

/// Raw records found on a page and the links it points to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub records: Vec<RawRecord>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction service unreachable: {0}")]
    Service(String),

    #[error("extraction service answered {0}")]
    Status(u16),

    #[error("malformed extraction payload: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, kind: PageKind, page: &Page) -> Result<Extraction, ExtractError>;
}

#[derive(Deserialize)]
struct Envelope {
    records: Vec<RawRecord>,
    #[serde(default)]
    links: Vec<String>,
}

/// Accepted payload shapes. The envelope needs `records` so that a single
/// raw record is never read as an empty envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Envelope(Envelope),
    Many(Vec<RawRecord>),
    One(RawRecord),
}

/// Parse an extraction payload: `{"records": [..], "links": [..]}`, a bare
/// array of raw records, or a single raw record.
pub fn parse_extraction(body: &str) -> Result<Extraction, ExtractError> {
    let payload: Payload =
        serde_json::from_str(body).map_err(|e| ExtractError::Malformed(e.to_string()))?;
    Ok(match payload {
        Payload::Envelope(Envelope { records, links }) => Extraction { records, links },
        Payload::Many(records) => Extraction {
            records,
            links: Vec::new(),
        },
        Payload::One(record) => Extraction {
            records: vec![record],
            links: Vec::new(),
        },
    })
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    kind: PageKind,
    url: &'a str,
    html: &'a str,
}

/// Client of the JSON extraction service.
#[derive(Debug, Clone)]
pub struct JsonExtractor {
    client: Client,
    endpoint: String,
}

impl JsonExtractor {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Extractor for JsonExtractor {
    async fn extract(&self, kind: PageKind, page: &Page) -> Result<Extraction, ExtractError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ExtractRequest {
                kind,
                url: &page.url,
                html: &page.body,
            })
            .send()
            .await
            .map_err(|e| ExtractError::Service(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Status(status.as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ExtractError::Service(e.to_string()))?;
        let extraction = parse_extraction(&body)?;
        debug!(
            kind = kind.as_str(),
            url = %page.url,
            records = extraction.records.len(),
            links = extraction.links.len(),
            "page extracted"
        );
        Ok(extraction)
    }
}

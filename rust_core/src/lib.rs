//! Esports crawl core - normalization, identity resolution and idempotent
//! reconciliation of scraped match, tournament, team, player and news data.
//!
//! This crate provides:
//! - Normalizer turning extracted raw field maps into typed records
//! - Natural-key resolution per entity kind
//! - Reconciliation engine: create, merge without clobbering, link
//! - Placeholder ("TBD") policy and the per-run tournament cache
//! - Persistence gateway with Postgres and in-memory implementations
//! - Fetch and extraction seams plus the crawl passes driving them

pub mod circuit_breaker;
pub mod crawl;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod identity;
pub mod models;
pub mod normalize;
pub mod placeholder;
pub mod reconcile;
pub mod utils;

pub use crawl::{CrawlConfig, Crawler, EntryPoint, PassReport};
pub use db::{InMemoryGateway, PersistenceGateway, PgGateway};
pub use identity::{resolve, NaturalKey, Resolution, Unresolved};
pub use models::{RawRecord, Record, RecordKind};
pub use normalize::Normalizer;
pub use placeholder::TournamentRunCache;
pub use reconcile::{EngineConfig, ReconciliationEngine, RecordOutcome, RunContext};

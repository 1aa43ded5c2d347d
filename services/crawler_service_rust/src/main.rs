mod config;
mod scheduler;

use anyhow::{Context, Result};
use config::Config;
use dotenv::dotenv;
use esports_rust_core::crawl::Crawler;
use esports_rust_core::db::retry::execute_with_retry;
use esports_rust_core::db::{self, DbPoolConfig, InMemoryGateway, PersistenceGateway, PgGateway};
use esports_rust_core::extract::JsonExtractor;
use esports_rust_core::fetch::HttpFetcher;
use esports_rust_core::normalize::Normalizer;
use scheduler::Scheduler;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting crawler service...");

    let config = Config::from_env().context("Failed to load configuration")?;

    // Store
    let gateway: Arc<dyn PersistenceGateway> = match (&config.database_url, config.dry_run) {
        (Some(url), false) => {
            let pool_config = DbPoolConfig::from_env().for_concurrency(config.crawl.concurrency);
            let pool = db::create_pool(url, pool_config).await?;
            db::migrate(&pool).await?;
            Arc::new(PgGateway::new(pool))
        }
        _ => {
            warn!("Dry run: crawled data is kept in memory only");
            Arc::new(InMemoryGateway::new())
        }
    };

    let sport = execute_with_retry(|| gateway.find_sport(&config.sport), 3)
        .await
        .context("Failed to look up sport")?;
    let sport_id = match sport {
        Some(sport) => Some(sport.sport_id),
        None => {
            warn!(sport = %config.sport, "sport not seeded, rows are stored without one");
            None
        }
    };

    // Collaborators
    let fetcher = Arc::new(HttpFetcher::new(config.fetch.clone()));
    let extractor = Arc::new(JsonExtractor::new(&config.extractor_url, config.extractor_timeout));
    let crawler = Arc::new(Crawler::new(
        fetcher,
        extractor,
        gateway,
        Normalizer::new(&config.base_url, &config.news_base_url),
        config.engine.clone(),
        config.crawl.clone(),
        sport_id,
    ));

    if let Some(entry) = config.run_once {
        let report = crawler.run(entry).await;
        info!(entry = entry.as_str(), ?report, "single pass finished");
        return Ok(());
    }

    let scheduler = Scheduler::new(crawler, config.intervals.clone());
    let tasks = scheduler.spawn();
    if tasks.is_empty() {
        warn!("No entry point enabled, nothing to do");
        return Ok(());
    }

    // Wait for signal
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }
    for task in tasks {
        task.abort();
    }

    Ok(())
}

//! Runs every enabled entry point on its own interval.
//!
//! Passes of one entry point never overlap: the next tick is only awaited
//! after the previous pass finished, and missed ticks are skipped.

use esports_rust_core::crawl::{Crawler, EntryPoint};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

pub struct Scheduler {
    crawler: Arc<Crawler>,
    intervals: BTreeMap<EntryPoint, Duration>,
}

impl Scheduler {
    pub fn new(crawler: Arc<Crawler>, intervals: BTreeMap<EntryPoint, Duration>) -> Self {
        Self { crawler, intervals }
    }

    /// Entry points with a non-zero interval.
    pub fn enabled(&self) -> Vec<(EntryPoint, Duration)> {
        enabled(&self.intervals)
    }

    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        self.enabled()
            .into_iter()
            .map(|(entry, every)| {
                let crawler = self.crawler.clone();
                info!(entry = entry.as_str(), interval_secs = every.as_secs(), "scheduling crawl");
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        crawler.run(entry).await;
                    }
                })
            })
            .collect()
    }
}

fn enabled(intervals: &BTreeMap<EntryPoint, Duration>) -> Vec<(EntryPoint, Duration)> {
    intervals
        .iter()
        .filter(|(_, every)| !every.is_zero())
        .map(|(entry, every)| (*entry, *every))
        .collect()
}

//! Per-host circuit breaker for page fetches.
//!
//! A crawl pass fans out many requests to the same one or two hosts. When a
//! host starts failing, every further request in the pass would fail too, so
//! the breaker short-circuits them until the host has had time to recover.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests are allowed
    Closed,
    /// Requests are refused until the recovery timeout elapses
    Open,
    /// Probing whether the host recovered
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time an open breaker waits before probing
    pub recovery_timeout: Duration,
    /// Successful probes needed to close again
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl BreakerConfig {
    /// Read `FETCH_CB_FAILURE_THRESHOLD` / `FETCH_CB_RECOVERY_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: std::env::var("FETCH_CB_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.failure_threshold),
            recovery_timeout: std::env::var("FETCH_CB_RECOVERY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.recovery_timeout),
            success_threshold: defaults.success_threshold,
        }
    }
}

pub struct HostBreaker {
    host: String,
    config: BreakerConfig,
    state: RwLock<BreakerState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure: RwLock<Option<Instant>>,
}

impl HostBreaker {
    pub fn new(host: &str, config: BreakerConfig) -> Self {
        Self {
            host: host.to_string(),
            config,
            state: RwLock::new(BreakerState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure: RwLock::new(None),
        }
    }

    /// Whether a request may go out now. An open breaker whose timeout has
    /// elapsed moves to half-open and lets the probe through.
    pub fn is_available(&self) -> bool {
        let mut state = self.state.write();
        match *state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self
                    .last_failure
                    .read()
                    .map(|t| t.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    *state = BreakerState::HalfOpen;
                    self.success_count.store(0, Ordering::SeqCst);
                }
                elapsed
            }
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut state = self.state.write();
        if *state == BreakerState::HalfOpen {
            let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
            if successes < self.config.success_threshold {
                return;
            }
            tracing::info!(host = %self.host, successes, "fetch breaker closed");
        }
        *state = BreakerState::Closed;
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_failure.write() = Some(Instant::now());

        let mut state = self.state.write();
        match *state {
            BreakerState::Closed if failures >= self.config.failure_threshold => {
                *state = BreakerState::Open;
                tracing::warn!(host = %self.host, failures, "fetch breaker opened");
            }
            BreakerState::HalfOpen => {
                *state = BreakerState::Open;
                tracing::warn!(host = %self.host, "fetch breaker re-opened during probe");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        *self.state.read()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }
}

/// Lazily created breakers, one per host.
#[derive(Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<FxHashMap<String, Arc<HostBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn for_host(&self, host: &str) -> Arc<HostBreaker> {
        if let Some(breaker) = self.breakers.read().get(host) {
            return breaker.clone();
        }
        self.breakers
            .write()
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostBreaker::new(host, self.config.clone())))
            .clone()
    }
}

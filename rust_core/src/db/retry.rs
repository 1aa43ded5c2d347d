//! Retry logic for transient store failures
//!
//! Exponential backoff for operations whose error type can tell transient
//! faults (connection loss, serialization failure, deadlock) from the rest.

use super::gateway::StoreError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that know whether trying again can help.
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

impl Retriable for StoreError {
    fn is_retriable(&self) -> bool {
        self.is_transient()
    }
}

impl Retriable for anyhow::Error {
    fn is_retriable(&self) -> bool {
        is_retriable_message(&self.to_string())
    }
}

impl Retriable for sqlx::Error {
    fn is_retriable(&self) -> bool {
        matches!(self, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed)
            || is_retriable_message(&self.to_string())
    }
}

/// Execute an operation, retrying transient failures with exponential
/// backoff starting at 100ms.
///
/// # Example
/// ```ignore
/// use esports_rust_core::db::retry::execute_with_retry;
///
/// let sport = execute_with_retry(|| gateway.find_sport("CS2"), 3).await?;
/// ```
pub async fn execute_with_retry<F, Fut, T, E>(f: F, max_attempts: u32) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retriable + Display,
{
    execute_with_retry_custom(f, max_attempts, 100, u64::MAX).await
}

/// Execute with retry and custom backoff configuration
pub async fn execute_with_retry_custom<F, Fut, T, E>(
    mut f: F,
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retriable + Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_attempts && e.is_retriable() => {
                let backoff_ms = base_backoff_ms
                    .saturating_mul(2_u64.saturating_pow(attempt - 1))
                    .min(max_backoff_ms);
                warn!(
                    "Store operation failed (attempt {}/{}): {}. Retrying in {}ms",
                    attempt, max_attempts, e, backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Whether an error message describes a transient database condition.
pub fn is_retriable_message(message: &str) -> bool {
    let err_str = message.to_lowercase();

    err_str.contains("connection")
        || err_str.contains("timeout")
        || err_str.contains("timed out")
        || err_str.contains("broken pipe")
        || err_str.contains("could not serialize")
        || err_str.contains("deadlock detected")
        || err_str.contains("too many clients")
        || err_str.contains("server closed the connection")
        || err_str.contains("ssl error")
        || err_str.contains("network error")
}

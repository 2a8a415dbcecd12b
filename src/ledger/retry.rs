//! Bounded exponential backoff for ledger reads and writes.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LedgerError;

/// Retry budget for transient ledger errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Sleep before the second attempt
    pub initial_backoff_ms: u64,
    /// Upper bound for any single sleep
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Sleep before attempt `attempt + 1` (attempt counts from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

fn is_transient(err: &LedgerError) -> bool {
    matches!(err, LedgerError::NotYetFinalized | LedgerError::Unavailable(_))
}

/// Run `op` until it succeeds, fails permanently, or the budget runs out.
///
/// `NotYetFinalized` and `Unavailable` are retried; `NotFound` is returned
/// immediately. The last error is returned when attempts are exhausted.
pub fn with_retry<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Result<T, LedgerError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) && attempt < attempts => {
                let wait = policy.backoff(attempt);
                debug!(what, attempt, ?wait, error = %e, "Ledger busy; backing off");
                thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => {
                if is_transient(&e) {
                    warn!(what, attempts, error = %e, "Ledger retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

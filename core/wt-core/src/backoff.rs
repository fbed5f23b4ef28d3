//! Bounded exponential backoff for store contention.
//!
//! Hook processes are numerous and short-lived, so two of them regularly try
//! to write at the same moment. A busy store is retried a handful of times
//! with growing, jittered delays before the caller sees `Contention`.

use rand::Rng;
use serde::Deserialize;
use std::cmp;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_DELAY_MS: u64 = 20;
const DEFAULT_MAX_DELAY_MS: u64 = 200;
const JITTER_PERCENT: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Policy that gives up on the first busy result.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    fn base_delay(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay_ms.saturating_mul(1u64 << shift);
        cmp::min(delay, self.max_delay_ms)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let spread = base * JITTER_PERCENT / 100;
        let jittered = if spread == 0 {
            base
        } else {
            let offset = rand::thread_rng().gen_range(0..=spread * 2);
            (base + offset).saturating_sub(spread)
        };
        Duration::from_millis(jittered)
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent.
    pub fn run<T>(&self, label: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_transient() => {
                    if attempt >= max_attempts {
                        warn!(op = label, attempts = attempt, "Store contention persisted; giving up");
                        return Err(StoreError::Contention { attempts: attempt });
                    }
                    let delay = self.delay(attempt);
                    debug!(
                        op = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Store busy; backing off"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

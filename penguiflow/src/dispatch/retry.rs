//! Per-call retry policy: exponential backoff with deterministic jitter.
//!
//! Retriability is decided per failure: explicitly transient failures and
//! upstream status codes listed in `retry_on_status` retry; everything else
//! fails immediately.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tools::ToolFailure;

fn default_max_attempts() -> u32 {
    3
}

fn default_min_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_retry_on_status() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

/// Retry policy attached to a tool descriptor (or the dispatcher default).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallRetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Upstream status codes that retry even when the failure is not marked
    /// transient.
    #[serde(default = "default_retry_on_status")]
    pub retry_on_status: Vec<u16>,
}

impl Default for CallRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_on_status: default_retry_on_status(),
        }
    }
}

impl CallRetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt should follow the failure of 0-based attempt
    /// `attempt`.
    pub fn should_retry(&self, attempt: u32, failure: &ToolFailure) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        failure.retriable
            || failure
                .status
                .is_some_and(|s| self.retry_on_status.contains(&s))
    }

    /// Backoff before the retry following 0-based attempt `attempt`:
    /// exponential from `min_backoff_ms`, capped, plus up to 25% jitter
    /// derived deterministically from `seed` so tests are stable.
    pub fn delay(&self, attempt: u32, seed: &str) -> Duration {
        let base = self
            .min_backoff_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.max_backoff_ms);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        seed.hash(&mut hasher);
        attempt.hash(&mut hasher);
        let jitter = if base == 0 {
            0
        } else {
            hasher.finish() % (base / 4 + 1)
        };
        Duration::from_millis(base.saturating_add(jitter).min(self.max_backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: listed status codes retry until attempts are exhausted;
    /// unlisted ones fail immediately.
    #[test]
    fn status_codes_gate_retries() {
        let policy = CallRetryPolicy {
            max_attempts: 3,
            retry_on_status: vec![500, 503],
            ..CallRetryPolicy::default()
        };
        let upstream = ToolFailure::status(503, "unavailable");
        assert!(policy.should_retry(0, &upstream));
        assert!(policy.should_retry(1, &upstream));
        assert!(!policy.should_retry(2, &upstream));

        let not_listed = ToolFailure::status(404, "missing");
        assert!(!policy.should_retry(0, &not_listed));
        let fatal = ToolFailure::fatal("bad args");
        assert!(!policy.should_retry(0, &fatal));
        let transient = ToolFailure::transient("flake");
        assert!(policy.should_retry(0, &transient));
    }

    /// **Scenario**: delay grows exponentially, stays within the cap, and is
    /// deterministic for a fixed seed.
    #[test]
    fn delay_exponential_capped_deterministic() {
        let policy = CallRetryPolicy {
            min_backoff_ms: 100,
            max_backoff_ms: 1_000,
            ..CallRetryPolicy::default()
        };
        let d0 = policy.delay(0, "call-1");
        let d1 = policy.delay(1, "call-1");
        let d5 = policy.delay(5, "call-1");
        assert!(d0 >= Duration::from_millis(100));
        assert!(d1 >= Duration::from_millis(200));
        assert!(d0 < d1);
        assert!(d5 <= Duration::from_millis(1_000));
        assert_eq!(policy.delay(0, "call-1"), policy.delay(0, "call-1"));
    }
}

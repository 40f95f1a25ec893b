//! Exponential backoff policy for stream connection attempts

use crate::cancel::CancelToken;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Retry policy configuration.
///
/// Stateless: callers keep their own failure counter and ask the policy what
/// to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(with = "crate::serde_millis")]
    pub base_delay: Duration,
    /// Multiplier applied per attempt
    pub factor: u32,
    /// Upper bound for any single delay
    #[serde(with = "crate::serde_millis")]
    pub max_delay: Duration,
    /// Number of retries allowed after the initial attempt
    pub max_attempts: u32,
}

/// Outcome of asking the policy about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make retry number `attempt` (1-based)
    Retry {
        /// Retry number
        attempt: u32,
        /// Backoff before the retry
        delay: Duration,
    },
    /// Bound reached, report a terminal failure
    GiveUp {
        /// Total attempts made, including the initial one
        attempts: u32,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    ///
    /// `base * factor^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.max(1).saturating_pow(exponent);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide what to do after `failures` consecutive failures (1-based).
    pub fn decide(&self, failures: u32) -> RetryDecision {
        if failures == 0 || failures > self.max_attempts {
            return RetryDecision::GiveUp {
                attempts: failures.max(1),
            };
        }
        RetryDecision::Retry {
            attempt: failures,
            delay: self.delay_for(failures),
        }
    }

    /// Full delay schedule for this policy
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|a| self.delay_for(a)).collect()
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` when cancelled; the caller must not proceed with the retry.
pub async fn backoff(delay: Duration, cancel: &CancelToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Retry backoff cancelled");
            false
        }
        _ = tokio::time::sleep(delay) => !cancel.is_cancelled(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_roundtrip_with_missing_fields() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(1));

        let json = serde_json::to_string(&RetryPolicy::default()).unwrap();
        assert!(json.contains("\"base_delay\":1000"));
    }

    #[test]
    fn test_none_gives_up_immediately() {
        assert_eq!(
            RetryPolicy::none().decide(1),
            RetryDecision::GiveUp { attempts: 1 }
        );
    }
}

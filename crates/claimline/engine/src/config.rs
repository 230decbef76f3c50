//! Engine configuration.

use claimline_types::Amount;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff for transient ledger reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Deployment profile for [`EngineConfig::for_profile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineProfile {
    /// A user is waiting on the result.
    Interactive,
    /// Background sweeps over many claims.
    Batch,
}

/// Commit engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deposit placed on every committed claim, in the smallest unit.
    pub deposit_amount: Amount,

    /// Upper bound on waiting for one confirmation.
    pub confirmation_timeout_ms: u64,

    /// Create all missing nodes in one write when the ledger supports it.
    pub batch_node_creation: bool,

    pub retry: RetryPolicy,

    /// Revert reasons containing any of these (case and punctuation ignored)
    /// mean "entity already exists".
    pub already_exists_reasons: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deposit_amount: Amount::from(1_000_000_000_000_000u64),
            confirmation_timeout_ms: 120_000,
            batch_node_creation: true,
            retry: RetryPolicy::default(),
            already_exists_reasons: vec!["AlreadyExists".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn for_profile(profile: EngineProfile) -> Self {
        let mut config = Self::default();
        match profile {
            EngineProfile::Interactive => {
                config.confirmation_timeout_ms = 60_000;
                config.retry.max_attempts = 3;
            }
            EngineProfile::Batch => {
                config.confirmation_timeout_ms = 300_000;
                config.retry.max_attempts = 6;
                config.retry.max_backoff_ms = 30_000;
            }
        }
        config
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn with_deposit(mut self, deposit: Amount) -> Self {
        self.deposit_amount = deposit;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_node_creation(mut self, enabled: bool) -> Self {
        self.batch_node_creation = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1_000));
    }

    #[test]
    fn batch_profile_waits_longer() {
        let interactive = EngineConfig::for_profile(EngineProfile::Interactive);
        let batch = EngineConfig::for_profile(EngineProfile::Batch);
        assert!(batch.confirmation_timeout() > interactive.confirmation_timeout());
        assert!(batch.retry.max_attempts > interactive.retry.max_attempts);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"deposit_amount": "42", "retry": {"max_attempts": 5}}"#).unwrap();
        assert_eq!(config.deposit_amount, Amount::from(42u64));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 200);
        assert_eq!(config.already_exists_reasons, vec!["AlreadyExists"]);
    }
}

//! Retry policy and per-query retry state

use crate::config::CorrectionConfig;
use crate::correction::agent::Correction;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trail entry type for a transient failure re-executed unchanged
pub const TRANSIENT_ENTRY: &str = "transient";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total executions allowed, the first one included
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CorrectionConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CorrectionConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            backoff_base: config.backoff_base,
            max_backoff: config.max_backoff,
        }
    }

    /// `base * 2^attempt`, capped at `max_backoff`
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base.saturating_mul(factor).min(self.max_backoff)
    }

    /// Base backoff plus up to 10% random jitter
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..0.1);
        base + base.mul_f64(jitter)
    }
}

/// Mutable state of one query's retry loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    /// Executions performed so far
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub last_error_type: Option<String>,
    pub last_sql: String,
    pub corrections: Vec<Correction>,
    pub start_time: DateTime<Utc>,
    pub total_latency_ms: u64,
}

impl RetryState {
    pub fn new(max_attempts: u32, sql: &str) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_error: None,
            last_error_type: None,
            last_sql: sql.to_string(),
            corrections: Vec::new(),
            start_time: Utc::now(),
            total_latency_ms: 0,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn record_failure(&mut self, sql: &str, error: &str, error_type: &str) {
        self.last_sql = sql.to_string();
        self.last_error = Some(error.to_string());
        self.last_error_type = Some(error_type.to_string());
    }

    /// Record a transient failure; the statement is re-run unchanged.
    pub fn record_transient(&mut self, sql: &str, error: &str) {
        self.record_failure(sql, error, TRANSIENT_ENTRY);
        self.corrections.push(Correction {
            correction_type: TRANSIENT_ENTRY.to_string(),
            description: format!("Transient failure, re-executing unchanged: {}", error),
            original: sql.to_string(),
            corrected: sql.to_string(),
        });
    }

    /// Stamp total latency; called once when the loop exits
    pub fn finish(mut self) -> Self {
        let elapsed = Utc::now().signed_duration_since(self.start_time);
        self.total_latency_ms = elapsed.num_milliseconds().max(0) as u64;
        self
    }

    /// Correction entries consumed, transient re-executions excluded
    pub fn correction_count(&self) -> usize {
        self.corrections
            .iter()
            .filter(|c| c.correction_type != TRANSIENT_ENTRY)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.base_backoff(0), Duration::from_millis(100));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(400));
        assert_eq!(policy.base_backoff(3), Duration::from_millis(500));
        assert_eq!(policy.base_backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let base = policy.base_backoff(attempt);
            let delay = policy.backoff_for(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base.mul_f64(0.1));
        }
    }

    #[test]
    fn test_state_transient_entry() {
        let mut state = RetryState::new(3, "SELECT 1");
        state.attempt = 1;
        state.record_transient("SELECT 1", "connection reset by peer");
        assert_eq!(state.corrections.len(), 1);
        assert_eq!(state.corrections[0].original, state.corrections[0].corrected);
        assert_eq!(state.last_error_type.as_deref(), Some("transient"));
        assert_eq!(state.correction_count(), 0);
        assert!(state.can_retry());
    }
}

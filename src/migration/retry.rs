//! Retry primitive with exponential backoff
//!
//! A fixed mapping from stable error code to policy governs which failures
//! the orchestrator may retry. Structural and policy-violation errors are
//! never retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{FlockError, Result};

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: Option<u64>,
    /// Multiplier between attempts
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let raw = (self.base_delay_ms as f64 * factor) as u64;
        let capped = match self.max_delay_ms {
            Some(max) => raw.min(max),
            None => raw,
        };
        Duration::from_millis(capped)
    }
}

/// Remote failures: 3 attempts starting at 30 s
pub const RETRY_NETWORK: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    base_delay_ms: 30_000,
    max_delay_ms: None,
    backoff_factor: 2.0,
};

/// Local I/O failures: 2 attempts starting at 5 s
pub const RETRY_LOCAL: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    base_delay_ms: 5_000,
    max_delay_ms: None,
    backoff_factor: 2.0,
};

/// The fixed code-to-policy map.
///
/// `None` means non-retryable: validation, FSM violations, duplicates,
/// peer rejections, verification failures, and size caps are structural;
/// retrying cannot fix them.
pub fn retry_policy_for(code: &str) -> Option<RetryPolicy> {
    match code {
        "NETWORK" | "TIMEOUT" => Some(RETRY_NETWORK),
        "LOCAL_IO" | "DATABASE" => Some(RETRY_LOCAL),
        _ => None,
    }
}

/// Runs `operation`, retrying per the policy mapped from each failure's
/// code.
///
/// # Errors
///
/// Returns the final error once attempts are exhausted or the failure is
/// non-retryable.
pub async fn with_retry<T, F, Fut>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(policy) = retry_policy_for(err.code()) else {
                    return Err(err);
                };
                if attempt >= policy.max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_should_double_delay_when_backoff_factor_is_two() {
        assert_eq!(
            RETRY_NETWORK.delay_for_attempt(1),
            Duration::from_millis(30_000)
        );
        assert_eq!(
            RETRY_NETWORK.delay_for_attempt(2),
            Duration::from_millis(60_000)
        );
    }

    #[test]
    fn test_should_cap_delay_when_max_is_configured() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: Some(1_500),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(1_500));
    }

    #[test]
    fn test_should_map_structural_codes_to_non_retryable() {
        for code in [
            "VALIDATION",
            "INVALID_PHASE_TRANSITION",
            "DUPLICATE_MIGRATION",
            "PEER_REJECTED",
            "VERIFICATION_FAILED",
            "SNAPSHOT_PORTABLE_SIZE_EXCEEDED",
        ] {
            assert!(retry_policy_for(code).is_none(), "{code} must not retry");
        }
        assert_eq!(retry_policy_for("NETWORK"), Some(RETRY_NETWORK));
        assert_eq!(retry_policy_for("LOCAL_IO"), Some(RETRY_LOCAL));
    }

    #[tokio::test]
    async fn test_should_not_retry_when_error_is_structural() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("structural", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FlockError::validation("field", "bad")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_network_failures_until_attempts_exhaust() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("network", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FlockError::Network {
                    message: "connection refused".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), RETRY_NETWORK.max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_succeed_when_a_later_attempt_passes() {
        let calls = AtomicU32::new(0);
        let result = with_retry("flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(FlockError::Network {
                        message: "transient".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

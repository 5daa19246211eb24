//! Exponential backoff with jitter for external calls.
//!
//! Delays step through `base_delays` (last entry repeats), each multiplied by
//! a uniform jitter in [0.8, 1.2] so synchronized clients do not retry in
//! lockstep. Retryable failures are rate limits, service unavailability,
//! timeouts, and connection-level resets; authentication and request errors
//! surface immediately.
//!
//! Outcomes feed the retry log: a success entry after a recovery (>= 1 failed
//! attempt), a failure entry after exhaustion. Logging problems never fail
//! the wrapped call.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::store::RetryLog;

// ============================================================================
// POLICY
// ============================================================================

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Base delays between attempts; the last entry repeats
    pub base_delays: Vec<Duration>,
    /// Apply the [0.8, 1.2] jitter window
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-based), jittered.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .base_delays
            .get((attempt as usize).min(self.base_delays.len().saturating_sub(1)))
            .copied()
            .unwrap_or(Duration::from_secs(1));
        if !self.jitter {
            return base;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.8..=1.2);
        base.mul_f64(factor)
    }
}

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

/// Implemented by error types the wrapper can classify.
pub trait RetryClass {
    /// Whether another attempt could succeed
    fn is_retryable(&self) -> bool;
    /// Short error label for the retry log (e.g. "RateLimited")
    fn error_type(&self) -> &'static str;
}

// ============================================================================
// RETRY LOG ENTRY
// ============================================================================

/// One `api_retry_log` row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryLogEntry {
    pub api_name: String,
    pub error_type: String,
    pub retry_count: u32,
    pub success: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl RetryLogEntry {
    pub fn new(api_name: &str, error_type: &str, retry_count: u32, success: bool) -> Self {
        Self {
            api_name: api_name.to_string(),
            error_type: error_type.to_string(),
            retry_count,
            success,
            created_at: chrono::Utc::now(),
        }
    }
}

// ============================================================================
// WRAPPER
// ============================================================================

/// Run `op` with retries per `policy`.
///
/// `op` receives the 0-based attempt number. The final error propagates
/// unchanged after exhaustion; the caller decides whether that becomes an
/// upstream-exhausted outcome.
pub async fn call_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    api_name: &str,
    retry_log: &dyn RetryLog,
    mut op: F,
) -> Result<T, E>
where
    E: RetryClass + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error_type: Option<&'static str> = None;

    for attempt in 0..=policy.max_retries {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    let error_type = last_error_type.unwrap_or("Unknown");
                    warn!(
                        api_name,
                        retries = attempt,
                        last_error = error_type,
                        "call recovered after retries"
                    );
                    retry_log
                        .record_retry(RetryLogEntry::new(api_name, error_type, attempt, true))
                        .await;
                }
                return Ok(value);
            }
            Err(e) => {
                let error_type = e.error_type();
                last_error_type = Some(error_type);

                if !e.is_retryable() {
                    error!(api_name, error_type, error = %e, "non-retryable error, failing immediately");
                    return Err(e);
                }

                if attempt == policy.max_retries {
                    error!(
                        api_name,
                        retries = policy.max_retries,
                        error = %e,
                        "retries exhausted"
                    );
                    retry_log
                        .record_retry(RetryLogEntry::new(
                            api_name,
                            error_type,
                            policy.max_retries,
                            false,
                        ))
                        .await;
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    api_name,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    error_type,
                    delay_ms = delay.as_millis() as u64,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop returns on success or final failure")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        RateLimited,
        Auth,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl RetryClass for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::RateLimited)
        }

        fn error_type(&self) -> &'static str {
            match self {
                TestError::RateLimited => "RateLimited",
                TestError::Auth => "Auth",
            }
        }
    }

    #[derive(Default)]
    struct RecordingLog {
        entries: Mutex<Vec<RetryLogEntry>>,
    }

    #[async_trait::async_trait]
    impl RetryLog for RecordingLog {
        async fn record_retry(&self, entry: RetryLogEntry) {
            self.entries.lock().unwrap().push(entry);
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 4,
            base_delays: vec![Duration::from_millis(1)],
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retryable_error_exhausts_exactly_max_retries() {
        let attempts = AtomicU32::new(0);
        let log = RecordingLog::default();
        let result: Result<(), TestError> =
            call_with_retry(&fast_policy(), "test_api", &log, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::RateLimited) }
            })
            .await;

        assert!(result.is_err());
        // Initial attempt + 4 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 5);

        let entries = log.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert_eq!(entries[0].retry_count, 4);
        assert_eq!(entries[0].error_type, "RateLimited");
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let log = RecordingLog::default();
        let result: Result<(), TestError> =
            call_with_retry(&fast_policy(), "test_api", &log, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Auth) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        // No retry log entry: nothing was retried
        assert!(log.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_records_success_entry() {
        let attempts = AtomicU32::new(0);
        let log = RecordingLog::default();
        let result: Result<u32, TestError> =
            call_with_retry(&fast_policy(), "test_api", &log, |attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(TestError::RateLimited)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let entries = log.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        assert_eq!(entries[0].retry_count, 2);
        assert_eq!(entries[0].error_type, "RateLimited");
    }

    #[tokio::test]
    async fn test_first_try_success_records_nothing() {
        let log = RecordingLog::default();
        let result: Result<u32, TestError> =
            call_with_retry(&fast_policy(), "test_api", &log, |_| async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert!(log.entries.lock().unwrap().is_empty());
    }

    #[test]
    fn test_delay_steps_through_base_delays_and_repeats_last() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_in_window() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let d = policy.delay_for_attempt(1).as_secs_f64();
            assert!((1.6..=2.4).contains(&d), "jittered delay {d} outside [0.8, 1.2] x 2s");
        }
    }
}

//! Retry policy with exponential backoff for mirror and lookup requests.
//!
//! A failed attempt is classified into a [`FailureType`]; the [`RetryPolicy`]
//! then decides whether another attempt is made and how long to wait.
//!
//! # Example
//!
//! ```
//! use twdl_core::fetch::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let failure = policy.classify_status(502);
//! assert_eq!(failure, FailureType::Transient);
//!
//! match policy.should_retry(failure, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert!(delay <= policy.max_delay());
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default attempt limit, counting the first attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff ceiling.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays.
const MAX_JITTER: Duration = Duration::from_millis(100);

/// Statuses that are retried even when range retries are disabled.
pub const RETRYABLE_STATUSES: &[u16] = &[400, 404, 502, 530];

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on another attempt (or another mirror).
    Transient,
    /// Will not succeed regardless of retries.
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// The attempt number about to be made (1-indexed).
        attempt: u32,
    },

    /// Give up.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Retry configuration with capped exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1) + jitter, max_delay)
/// ```
///
/// With defaults, delays are approximately 1s, 2s, 4s, 5s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Backoff ceiling, jitter included.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,

    /// Retry every 4xx/5xx status, not only [`RETRYABLE_STATUSES`].
    retry_error_ranges: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            retry_error_ranges: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom timing.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            retry_error_ranges: true,
        }
    }

    /// Creates a policy with a custom attempt limit and default timing.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Restricts status retries to [`RETRYABLE_STATUSES`] when `enabled` is false.
    #[must_use]
    pub fn with_range_retries(mut self, enabled: bool) -> Self {
        self.retry_error_ranges = enabled;
        self
    }

    /// Returns the attempt limit.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff ceiling.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Classifies an error status (400-599).
    #[must_use]
    pub fn classify_status(&self, status: u16) -> FailureType {
        if RETRYABLE_STATUSES.contains(&status) {
            return FailureType::Transient;
        }
        if self.retry_error_ranges && is_error_status(status) {
            FailureType::Transient
        } else {
            FailureType::Permanent
        }
    }

    /// Decides whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);

        let ceiling_ms = self.max_delay.as_millis() as f64;
        let total_ms = (delay_ms + jitter_ms as f64).min(ceiling_ms);
        Duration::from_millis(total_ms as u64)
    }
}

/// Returns true for 4xx and 5xx statuses.
#[must_use]
pub fn is_error_status(status: u16) -> bool {
    (400..600).contains(&status)
}

/// Classifies a transport-level error.
///
/// Timeouts, refused or reset connections and DNS failures are transient;
/// TLS problems and malformed requests are permanent.
#[must_use]
pub fn classify_transport_error(error: &reqwest::Error) -> FailureType {
    if error.is_builder() || is_tls_error(error) {
        FailureType::Permanent
    } else {
        FailureType::Transient
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Duration::from_secs(5));
        assert!(policy.retry_error_ranges);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_explicit_statuses_always_transient() {
        let policy = RetryPolicy::default().with_range_retries(false);
        for status in RETRYABLE_STATUSES {
            assert_eq!(policy.classify_status(*status), FailureType::Transient);
        }
        assert_eq!(policy.classify_status(403), FailureType::Permanent);
        assert_eq!(policy.classify_status(500), FailureType::Permanent);
    }

    #[test]
    fn test_range_retries_cover_all_error_statuses() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.classify_status(403), FailureType::Transient);
        assert_eq!(policy.classify_status(599), FailureType::Transient);
    }

    #[test]
    fn test_is_error_status_bounds() {
        assert!(!is_error_status(399));
        assert!(is_error_status(400));
        assert!(is_error_status(599));
        assert!(!is_error_status(600));
    }

    #[test]
    fn test_delay_never_exceeds_ceiling() {
        let policy = RetryPolicy::new(20, Duration::from_secs(1), Duration::from_secs(5), 2.0);
        for attempt in 1..20 {
            assert!(policy.calculate_delay(attempt) <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_delay_first_attempt_is_base_plus_jitter() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(5), 2.0);
        let delay = policy.calculate_delay(1);
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_secs(1) + MAX_JITTER);
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(60), 2.0);
        let third = policy.calculate_delay(3);
        assert!(third >= Duration::from_millis(400));
        assert!(third <= Duration::from_millis(400) + MAX_JITTER);
    }

    #[test]
    fn test_should_retry_until_limit() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO, 2.0);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        match policy.should_retry(FailureType::Transient, 3) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("exhausted")),
            RetryDecision::Retry { .. } => panic!("should stop at the limit"),
        }
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }
}

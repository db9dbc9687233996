use std::time::Duration;

use rand::Rng;

use crate::error::HttpClientError;

/// How the computed backoff is perturbed to avoid synchronized retry bursts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterMode {
    /// Use the computed delay as-is.
    None,
    /// Draw uniformly from `[0, computed]`.
    Full,
    /// Draw uniformly from `[computed / 2, computed]`.
    #[default]
    Equal,
}

/// Decides whether a failed attempt is retried and how long to wait.
///
/// The delay grows as `base * 2^(attempt - 1)`, capped at `max_backoff`, then
/// jittered per [`JitterMode`]. A server Retry-After hint always wins when it
/// is larger than the computed delay.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter: JitterMode,
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter: JitterMode::None,
        }
    }

    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter: JitterMode::default(),
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff.max(Duration::from_millis(1));
        if self.max_backoff < self.base_backoff {
            self.max_backoff = self.base_backoff;
        }
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.base_backoff);
        self
    }

    pub fn jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    pub(crate) fn max_attempts_value(&self) -> usize {
        self.max_attempts
    }

    /// `attempt` counts attempts already performed (1-based once the first
    /// attempt has failed). Retry requires remaining budget and a retryable
    /// error kind.
    pub fn should_retry(&self, error: &HttpClientError, attempt: usize) -> bool {
        attempt < self.max_attempts && error.retryable
    }

    /// Backoff before the retry that follows failed attempt `attempt`.
    pub fn backoff_for_attempt(&self, attempt: usize) -> Duration {
        let capped_exponent = attempt.saturating_sub(1).min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let base_ms = self.base_backoff.as_millis().max(1);
        let max_ms = self.max_backoff.as_millis().max(base_ms);
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(max_ms)
            .min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    /// Computed backoff combined with a server Retry-After hint: never less
    /// than the hint.
    pub(crate) fn delay_with_hint(&self, attempt: usize, hint: Option<Duration>) -> Duration {
        let computed = self.backoff_for_attempt(attempt);
        match hint {
            Some(hint) => computed.max(hint),
            None => computed,
        }
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }

        let mut rng = rand::rng();
        let sampled_ms = match self.jitter {
            JitterMode::None => return backoff,
            JitterMode::Full => rng.random_range(0..=backoff_ms),
            JitterMode::Equal => rng.random_range(backoff_ms / 2..=backoff_ms),
        };
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// One attempt's outcome within a single dispatch; never shared across calls.
/// Terminal errors expose the full list via
/// [`HttpClientError::attempt_history`](crate::HttpClientError::attempt_history).
#[derive(Clone, Debug)]
pub struct AttemptRecord {
    /// 0-based attempt index.
    pub index: usize,
    pub error: Option<HttpClientError>,
    /// Delay scheduled before the next attempt, when one follows.
    pub delay: Option<Duration>,
}

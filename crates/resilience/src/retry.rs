//! Retry execution with exponential backoff.
//!
//! [`retry_with_backoff`] drives repeated invocation of a fallible async
//! operation. Failures are classified by the configured predicate; retryable
//! failures back off on the schedule in [`RetryOptions`], anything else
//! fails fast. When the sequence gives up it returns a [`RetryError`]
//! carrying the complete failure history.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::backoff::{Backoff, JitterSource, ThreadRngJitter};
use crate::error::{ConfigError, ConfigResult};

/// Predicate deciding whether a failure is worth another attempt.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Options governing a retry sequence.
///
/// The defaults retry every failure up to 3 attempts on the default
/// [`Backoff`] schedule with full jitter. Presets in [`crate::policies`]
/// install domain-specific classifiers and timing.
pub struct RetryOptions<E> {
    /// Total invocation budget, including the first attempt
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: Backoff,
    /// Whether to randomize each delay within `[0, computed]`
    pub jitter: bool,
    jitter_source: Arc<dyn JitterSource>,
    retry_on: RetryPredicate<E>,
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            jitter_source: Arc::clone(&self.jitter_source),
            retry_on: Arc::clone(&self.retry_on),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryOptions<E> {
    /// Options that retry every failure: 3 attempts on the default backoff
    /// schedule with full jitter.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter: true,
            jitter_source: Arc::new(ThreadRngJitter),
            retry_on: Arc::new(|_| true),
        }
    }

    /// Set the total attempt budget with validation.
    pub fn with_max_attempts(mut self, attempts: u32) -> ConfigResult<Self> {
        if attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    /// Set the base delay with validation against the delay cap.
    pub fn with_base_delay(mut self, delay: Duration) -> ConfigResult<Self> {
        if delay > self.backoff.max_delay {
            return Err(ConfigError::invalid(format!(
                "base_delay ({:?}) cannot be greater than max_delay ({:?})",
                delay, self.backoff.max_delay
            )));
        }
        self.backoff.base_delay = delay;
        Ok(self)
    }

    /// Set the delay cap with validation against the base delay.
    pub fn with_max_delay(mut self, delay: Duration) -> ConfigResult<Self> {
        if delay < self.backoff.base_delay {
            return Err(ConfigError::invalid(format!(
                "max_delay ({:?}) cannot be less than base_delay ({:?})",
                delay, self.backoff.base_delay
            )));
        }
        self.backoff.max_delay = delay;
        Ok(self)
    }

    /// Set the backoff growth factor with validation.
    pub fn with_multiplier(mut self, multiplier: f64) -> ConfigResult<Self> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::invalid(format!(
                "backoff multiplier must be a finite value >= 1.0, got {multiplier}"
            )));
        }
        self.backoff.multiplier = multiplier;
        Ok(self)
    }

    /// Enable or disable delay randomization.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the jitter randomness source.
    pub fn with_jitter_source(mut self, source: impl JitterSource + 'static) -> Self {
        self.jitter_source = Arc::new(source);
        self
    }

    /// Set the predicate that decides whether a failure is retryable.
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    /// Whether the configured classifier considers `error` retryable.
    pub fn is_retryable(&self, error: &E) -> bool {
        (self.retry_on)(error)
    }

    /// The delay to wait after the given completed attempt, with jitter
    /// applied when enabled.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let computed = self.backoff.delay_for_attempt(attempt);
        if self.jitter {
            self.jitter_source.sample(computed)
        } else {
            computed
        }
    }
}

/// Why a retry sequence gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorKind {
    /// Every allowed attempt failed with a retryable error
    Exhausted,
    /// The most recent failure was classified non-retryable
    NonRetryable,
}

/// Aggregated failure produced when a retry sequence gives up.
///
/// Carries every failure in attempt order. The attempt count is the length
/// of that history and the last entry is the failure that ended the
/// sequence, so those relationships hold by construction. Immutable once
/// constructed.
#[derive(Debug)]
pub struct RetryError<E> {
    errors: Vec<E>,
    total_delay: Duration,
    kind: RetryErrorKind,
}

impl<E> RetryError<E> {
    fn new(errors: Vec<E>, total_delay: Duration, kind: RetryErrorKind) -> Self {
        debug_assert!(!errors.is_empty(), "a retry error records at least one failure");
        Self { errors, total_delay, kind }
    }

    /// Number of invocations made before giving up.
    pub fn attempts(&self) -> u32 {
        self.errors.len() as u32
    }

    /// Every failure encountered, in attempt order.
    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    /// The failure that ended the sequence.
    pub fn last_error(&self) -> &E {
        self.errors.last().expect("retry error always holds at least one failure")
    }

    /// Total time spent suspended between attempts.
    pub fn total_delay(&self) -> Duration {
        self.total_delay
    }

    /// Why the sequence gave up.
    pub fn kind(&self) -> RetryErrorKind {
        self.kind
    }

    /// True when the attempt budget was spent on retryable failures.
    pub fn is_exhausted(&self) -> bool {
        self.kind == RetryErrorKind::Exhausted
    }

    /// Consume the error and take ownership of the failure history.
    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RetryErrorKind::Exhausted => write!(
                f,
                "all {} attempts failed after {:?} of backoff: {}",
                self.attempts(),
                self.total_delay,
                self.last_error()
            ),
            RetryErrorKind::NonRetryable => write!(
                f,
                "non-retryable failure on attempt {}: {}",
                self.attempts(),
                self.last_error()
            ),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.last_error())
    }
}

/// Drive `operation` until it succeeds, the attempt budget is spent, or a
/// failure is classified non-retryable.
///
/// Success returns immediately with no further attempts and no delay. On
/// giving up, the returned [`RetryError`] carries every failure observed in
/// order together with the total time actually spent suspended between
/// attempts.
///
/// The only suspension point is the inter-attempt delay, a cooperative
/// `tokio::time::sleep`; dropping the returned future during that wait
/// abandons the whole sequence without side effects.
#[instrument(skip_all, fields(max_attempts = options.max_attempts))]
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    options: RetryOptions<E>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = options.max_attempts.max(1);
    let mut errors = Vec::new();
    let mut total_delay = Duration::ZERO;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(attempt, max_attempts, "executing operation");

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        attempt,
                        total_delay_ms = total_delay.as_millis() as u64,
                        "operation succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                let retryable = options.is_retryable(&error);

                if attempt >= max_attempts || !retryable {
                    warn!(
                        attempt,
                        retryable,
                        total_delay_ms = total_delay.as_millis() as u64,
                        error = %error,
                        "giving up"
                    );
                    errors.push(error);
                    let kind = if retryable {
                        RetryErrorKind::Exhausted
                    } else {
                        RetryErrorKind::NonRetryable
                    };
                    return Err(RetryError::new(errors, total_delay, kind));
                }

                let delay = options.next_delay(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "operation failed, backing off"
                );
                errors.push(error);

                tokio::time::sleep(delay).await;
                total_delay += delay;
            }
        }
    }
}

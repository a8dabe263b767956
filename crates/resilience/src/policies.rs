//! Preset retry policies for common failure domains.
//!
//! Each preset pairs a transient-failure signal set from [`crate::classify`]
//! with timing tuned for its domain: connection retries are patient,
//! transaction-conflict retries are fast and short-lived.

use std::future::Future;
use std::time::Duration;

use crate::classify::{ErrorCode, TransientErrorSet};
use crate::retry::{retry_with_backoff, RetryError, RetryOptions};

/// Named option bundles for the retry executor.
pub struct RetryPolicies;

impl RetryPolicies {
    /// General-purpose policy: 3 attempts, 1s base delay, 30s cap, retrying
    /// failures that match the general transient signal set.
    pub fn general<E>() -> RetryOptions<E>
    where
        E: std::error::Error + ErrorCode,
    {
        let signals = TransientErrorSet::general();
        RetryOptions::new().retry_when(move |error: &E| signals.classify(error))
    }

    /// Database-connection policy: a patient reconnect schedule (5 attempts,
    /// 500ms base delay, 10s cap) that also treats dropped or unreachable
    /// server connections as transient.
    pub fn database_connection<E>() -> RetryOptions<E>
    where
        E: std::error::Error + ErrorCode,
    {
        let signals = TransientErrorSet::database();
        RetryOptions::new()
            .with_max_attempts(5)
            .expect("preset attempts are valid")
            .with_base_delay(Duration::from_millis(500))
            .expect("preset base delay is valid")
            .with_max_delay(Duration::from_secs(10))
            .expect("preset max delay is valid")
            .retry_when(move |error: &E| signals.classify(error))
    }

    /// Transaction-conflict policy: quick re-runs (3 attempts, 100ms base
    /// delay, 2s cap) for serialization failures, deadlocks, and lock
    /// timeouts.
    pub fn transaction_conflict<E>() -> RetryOptions<E>
    where
        E: std::error::Error + ErrorCode,
    {
        let signals = TransientErrorSet::transaction();
        RetryOptions::new()
            .with_base_delay(Duration::from_millis(100))
            .expect("preset base delay is valid")
            .with_max_delay(Duration::from_secs(2))
            .expect("preset max delay is valid")
            .retry_when(move |error: &E| signals.classify(error))
    }
}

/// Run `operation` under the database-connection policy.
pub async fn with_database_retry<F, Fut, T, E>(operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + ErrorCode,
{
    retry_with_backoff(operation, RetryPolicies::database_connection()).await
}

/// Run `operation` under the transaction-conflict policy.
pub async fn with_transaction_retry<F, Fut, T, E>(operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + ErrorCode,
{
    retry_with_backoff(operation, RetryPolicies::transaction_conflict()).await
}

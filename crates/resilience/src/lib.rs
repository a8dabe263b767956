//! Resilience primitives shared across Keel services.
//!
//! This crate wraps fallible operations (typically network or database
//! calls) with two composable protections:
//! - **Retry with backoff**: [`retry_with_backoff`] re-invokes an operation
//!   on transient failures, with exponential delays, a hard cap, and
//!   jitter. [`RetryPolicies`] bundles classifiers and timing for common
//!   domains (database connections, transaction conflicts).
//! - **Circuit breaking**: [`CircuitBreaker`] tracks failures across calls
//!   to one resource, fails fast during an outage, and probes for recovery
//!   after a cooldown.
//!
//! Retry sequences are self-contained values: each call to
//! [`retry_with_backoff`] owns its state and concurrent sequences do not
//! interfere. A [`CircuitBreaker`] is the opposite — deliberately shared
//! mutable state, one instance per protected resource, reused across every
//! call site so failure counts actually accumulate.
//!
//! Attempt outcomes and breaker transitions are reported through
//! [`tracing`] events; this crate never installs a subscriber.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod error;
pub mod policies;
pub mod retry;

// Re-export commonly used types for convenience
// ------------------------------
pub use backoff::{Backoff, FractionalJitter, JitterSource, ThreadRngJitter};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerError,
    CircuitBreakerSnapshot, CircuitState, Clock, MockClock, SystemClock,
};
pub use classify::{ErrorCode, TransientErrorSet};
pub use error::{ConfigError, ConfigResult};
pub use policies::{with_database_retry, with_transaction_retry, RetryPolicies};
pub use retry::{retry_with_backoff, RetryError, RetryErrorKind, RetryOptions, RetryPredicate};

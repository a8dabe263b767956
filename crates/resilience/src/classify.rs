//! Transient-failure classification.
//!
//! Classification is a pure lookup against a set of known transient error
//! codes and a set of known message substrings, kept in one place rather
//! than scattered across call sites. Anything unmatched is non-retryable:
//! retrying a syntax error cannot fix it and only wastes time.

use std::io;

/// Error codes that always mark a failure as transient.
///
/// Covers dropped/refused/timed-out connections plus the SQLSTATE codes for
/// serialization failures (40001) and deadlocks (40P01).
const TRANSIENT_CODES: &[&str] =
    &["ECONNRESET", "ECONNREFUSED", "ETIMEDOUT", "EPIPE", "40001", "40P01"];

/// Message fragments that mark a failure as transient for any operation.
const GENERAL_SUBSTRINGS: &[&str] =
    &["connection reset", "connection refused", "timed out", "broken pipe"];

/// Additional fragments produced when a database server drops or refuses a
/// connection.
const DATABASE_SUBSTRINGS: &[&str] = &[
    "terminating connection due to administrator command",
    "server closed the connection unexpectedly",
    "Connection terminated unexpectedly",
    "could not connect to server",
    "the database system is starting up",
];

/// Additional fragments produced when a transaction loses a concurrency
/// race and is safe to re-run.
const TRANSACTION_SUBSTRINGS: &[&str] =
    &["could not serialize access", "deadlock detected", "tuple concurrently updated", "lock timeout"];

/// Optional machine-readable code carried by a failure value.
///
/// Classification looks at a failure as a `(code, message)` pair: the code
/// is matched exactly against the transient code set, the message against
/// the substring set. Errors without a code participate in substring
/// matching only.
pub trait ErrorCode {
    fn error_code(&self) -> Option<&str> {
        None
    }
}

impl ErrorCode for io::Error {
    fn error_code(&self) -> Option<&str> {
        match self.kind() {
            io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
            io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
            io::ErrorKind::BrokenPipe => Some("EPIPE"),
            _ => None,
        }
    }
}

/// Set of signals that mark a failure as transient.
///
/// Code matching is exact; substring matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientErrorSet {
    codes: &'static [&'static str],
    substrings: Vec<&'static str>,
}

impl TransientErrorSet {
    /// The general-purpose signal set: transient error codes plus common
    /// network failure messages.
    pub fn general() -> Self {
        Self { codes: TRANSIENT_CODES, substrings: GENERAL_SUBSTRINGS.to_vec() }
    }

    /// The general set extended with database connection failure messages.
    pub fn database() -> Self {
        Self::general().with_substrings(DATABASE_SUBSTRINGS)
    }

    /// The general set extended with transaction conflict messages.
    pub fn transaction() -> Self {
        Self::general().with_substrings(TRANSACTION_SUBSTRINGS)
    }

    /// Extend the substring set with additional transient message fragments.
    pub fn with_substrings(mut self, extra: &[&'static str]) -> Self {
        self.substrings.extend_from_slice(extra);
        self
    }

    /// Decide whether a failure described by `code` and `message` is worth
    /// retrying.
    pub fn is_transient(&self, code: Option<&str>, message: &str) -> bool {
        if let Some(code) = code {
            if self.codes.contains(&code) {
                return true;
            }
        }
        self.substrings.iter().any(|needle| message.contains(needle))
    }

    /// Classify an error value directly, reading its code via [`ErrorCode`]
    /// and its message via `Display`.
    pub fn classify<E>(&self, error: &E) -> bool
    where
        E: std::error::Error + ErrorCode,
    {
        self.is_transient(error.error_code(), &error.to_string())
    }
}

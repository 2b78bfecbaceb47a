use std::time::Duration;

use thiserror::Error;

/// Unified error type for the transit ingestion workspace.
///
/// Mirrors the taxonomy in the system design: quota rejection, fatal
/// upstream API errors, lock acquisition timeouts, protocol violations
/// (schema drift between this engine and the upstream feed), and opaque
/// store failures. Transient upstream failures (connection errors, non-200
/// responses, retryable API errors) are *not* represented here — callers
/// see them as an empty result, never an `Err`.
#[derive(Debug, Error)]
pub enum Error {
    /// The quota meter refused to let a request through.
    #[error("quota exhausted: {requested} bytes requested, {available} remaining in the trailing {window:?} window")]
    QuotaExhausted {
        /// Bytes the caller wanted to spend (0 when only precheck is known).
        requested: u64,
        /// Bytes still available in the sliding window.
        available: u64,
        /// Width of the sliding window being enforced.
        window: Duration,
    },

    /// The upstream feed returned an API error with `shouldRetry=false`.
    #[error("fatal upstream error: {message}")]
    UpstreamFatal {
        /// The error text the upstream feed returned.
        message: String,
    },

    /// A named lock could not be acquired before its timeout elapsed.
    #[error("lock '{name}' timed out after {timeout:?}")]
    LockTimeout {
        /// The lock name that timed out.
        name: String,
        /// The configured acquisition timeout.
        timeout: Duration,
    },

    /// The upstream feed's response contradicts data already on hand
    /// (e.g. a prediction referencing a stop the route doesn't serve).
    /// Indicates schema drift, not a transient fault.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The backing store rejected or failed an operation.
    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    /// Build a `QuotaExhausted` error.
    #[must_use]
    pub const fn quota_exhausted(requested: u64, available: u64, window: Duration) -> Self {
        Self::QuotaExhausted {
            requested,
            available,
            window,
        }
    }

    /// Build an `UpstreamFatal` error from the upstream's error text.
    pub fn upstream_fatal(message: impl Into<String>) -> Self {
        Self::UpstreamFatal {
            message: message.into(),
        }
    }

    /// Build a `LockTimeout` error.
    pub fn lock_timeout(name: impl Into<String>, timeout: Duration) -> Self {
        Self::LockTimeout {
            name: name.into(),
            timeout,
        }
    }

    /// Build a `ProtocolViolation` error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    /// Build a `Store` error from a backend-reported message.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

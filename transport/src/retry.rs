//! Retry policy for rejected anti-forgery tokens.
//!
//! The only failure the transport retries is a mutating request whose token
//! the server rejected. The cached token is discarded, a fresh one fetched and
//! the request replayed. Everything else, including transient network errors,
//! is surfaced to the caller immediately.
//!
//! A rejection is recognised by status (`403`, `419`) or by error code.

use crate::error::TransportError;
use reqwest::Method;

/// Error codes the server uses for a missing, stale or forged token
pub const TOKEN_REJECTION_CODES: [&str; 3] =
    ["INVALID_CSRF_TOKEN", "CSRF_TOKEN_MISSING", "CSRF_TOKEN_EXPIRED"];

/// Statuses that mean the token was rejected
pub const TOKEN_REJECTION_STATUSES: [u16; 2] = [403, 419];

/// Whether `method` changes server state and therefore needs a token
#[must_use]
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Whether the error is the server rejecting the anti-forgery token
#[must_use]
pub fn is_token_rejection(error: &TransportError) -> bool {
    error.api().is_some_and(|api| {
        TOKEN_REJECTION_STATUSES.contains(&api.status)
            || TOKEN_REJECTION_CODES.contains(&api.code.as_str())
    })
}

/// How many times a request with a rejected token is replayed.
///
/// # Default Values
///
/// - `max_retries`: 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRetryPolicy {
    /// Maximum number of replays after the first attempt
    pub max_retries: usize,
}

impl Default for TokenRetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1 }
    }
}

impl TokenRetryPolicy {
    /// A policy that never replays
    #[must_use]
    pub const fn never() -> Self {
        Self { max_retries: 0 }
    }

    /// Whether attempt number `attempt` (0 for the first send) that failed
    /// with `error` should be replayed
    #[must_use]
    pub fn should_retry(&self, method: &Method, error: &TransportError, attempt: usize) -> bool {
        attempt < self.max_retries && is_mutating(method) && is_token_rejection(error)
    }
}

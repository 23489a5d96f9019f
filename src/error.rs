//! Error types for the generation core.
//!
//! Errors are categorized so the retry policy can distinguish transient
//! failures (retried internally, never surfaced individually) from permanent
//! ones (terminal immediately). Only the final terminal outcome crosses the
//! orchestrator boundary.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while servicing a generation request.
///
/// Transient classes (`Backpressure`, `Transport`, `Timeout`, HTTP 429/5xx
/// `Provider` errors) are retried by the orchestrator per the retry policy.
/// Everything else is permanent and fails the request on first occurrence.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    /// Request rejected before dispatch (empty prompt, bad parameters)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Dispatcher queue is full; caller should back off and resubmit
    #[error("dispatcher queue full")]
    Backpressure,

    /// Network-level failure reaching the provider
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP attempt exceeded the per-attempt timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Provider returned a non-success HTTP status
    #[error("provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    /// Response body could not be decoded for the requested kind
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Image payload uses an encoding the decoder does not recognize
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Request was cancelled before completing
    #[error("generation cancelled")]
    Cancelled,

    /// Internal error (e.g., channel closed unexpectedly)
    #[error("internal error: {0}")]
    Internal(String),
}

impl GenerationError {
    /// Returns true if this error class may succeed on a later attempt.
    ///
    /// HTTP 429 (rate limited) and 5xx statuses are transient; all other
    /// provider statuses are permanent. Decode failures are never retried
    /// since the provider already answered.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Backpressure
            | GenerationError::Transport(_)
            | GenerationError::Timeout(_) => true,
            GenerationError::Provider { status, .. } => {
                *status == 429 || (500..600).contains(status)
            }
            GenerationError::InvalidRequest(_)
            | GenerationError::MalformedResponse(_)
            | GenerationError::UnsupportedFormat(_)
            | GenerationError::Cancelled
            | GenerationError::Internal(_) => false,
        }
    }
}

//! Error types for the valuation pipeline
//!
//! `SourceError` never escapes the pipeline: every adapter failure is
//! converted to "absent" at the fan-in point. `ValuationError` is what the
//! service returns to its caller.

use thiserror::Error;

/// Failure of a single external data source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure (DNS, connect, TLS, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Call exceeded its own timeout
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Upstream returned a non-success status
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Unexpected response shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Source cannot answer for this input (missing key, coordinates, token)
    #[error("Source not available: {0}")]
    NotAvailable(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

/// Top-level valuation error
#[derive(Debug, Error)]
pub enum ValuationError {
    /// Caller disconnected or cancelled the request
    #[error("Valuation cancelled")]
    Cancelled,

    /// Request-level timeout elapsed before the pipeline finished
    #[error("Valuation timed out after {0}s")]
    TimedOut(u64),

    /// Subject property failed basic validation
    #[error("Invalid subject property: {0}")]
    InvalidSubject(String),
}

/// Result type for valuation operations
pub type ValuationResult<T> = Result<T, ValuationError>;

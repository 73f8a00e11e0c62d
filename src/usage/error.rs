//! Usage client error types.

use thiserror::Error;

/// Result type for usage operations.
pub type UsageResult<T> = Result<T, UsageError>;

/// Errors that can occur while fetching subscription usage.
#[derive(Debug, Error)]
pub enum UsageError {
    /// Credentials file missing, unreadable, or without a token.
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    /// HTTP request failed.
    #[error("usage request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Usage API returned a non-success status.
    #[error("usage API returned status {0}")]
    ApiStatus(u16),

    /// Response body did not have the expected shape.
    #[error("failed to parse usage response: {0}")]
    Parse(String),
}

//! Typed errors for the canonicalization library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during canonicalization.
#[derive(Debug, Error)]
pub enum CanonError {
    /// Reading or writing a boundary file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A boundary record could not be interpreted
    #[error("invalid record at line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

/// Errors raised by an oracle or completion backend.
///
/// None of these are fatal to a canonicalization run: the batch scheduler and
/// the cluster builder turn every one of them into a fallback.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Connection failed or the request could not be sent
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response from the service
    #[error("API error: {0}")]
    Api(String),

    /// Reply could not be decoded into the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A single attempt exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Every allowed attempt failed
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<OracleError>,
    },
}

impl OracleError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// Result type alias for canonicalization operations.
pub type Result<T> = std::result::Result<T, CanonError>;

/// Result type alias for oracle operations.
pub type OracleResult<T> = std::result::Result<T, OracleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(OracleError::Transport("refused".into()).is_retryable());
        assert!(OracleError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!OracleError::Api("400".into()).is_retryable());
        assert!(!OracleError::Malformed("oops".into()).is_retryable());
    }

    #[test]
    fn test_exhausted_message_includes_last_error() {
        let err = OracleError::RetriesExhausted {
            attempts: 3,
            last: Box::new(OracleError::Transport("reset".into())),
        };
        assert_eq!(
            err.to_string(),
            "retries exhausted after 3 attempts: transport error: reset"
        );
    }
}

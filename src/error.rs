//! Error types surfaced at the session boundary.

use thiserror::Error;

/// Result type for deduplication operations
pub type Result<T> = std::result::Result<T, DedupeError>;

/// Every variant is recoverable by operator action; none abort the session.
#[derive(Error, Debug)]
pub enum DedupeError {
    /// Input bytes could not be decoded with the expected text encoding
    #[error("Failed to decode input as {encoding}: {message}. Try another encoding.")]
    Decode { encoding: String, message: String },

    /// Not enough labeled pairs to fit a decision boundary
    #[error(
        "Insufficient training data: {matches} match and {distinct} distinct pairs labeled \
         (need at least one of each and {minimum} in total)"
    )]
    InsufficientTrainingData {
        matches: usize,
        distinct: usize,
        minimum: usize,
    },

    /// A long-running operation observed the cancellation flag
    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    /// Catch-all processing error
    #[error("Error: {0}")]
    Processing(String),
}

impl DedupeError {
    pub fn processing(message: impl Into<String>) -> Self {
        DedupeError::Processing(message.into())
    }
}

impl From<std::string::FromUtf8Error> for DedupeError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        DedupeError::Decode {
            encoding: "utf-8".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DedupeError {
    fn from(err: serde_json::Error) -> Self {
        DedupeError::Processing(format!("Malformed record input: {}", err))
    }
}

impl From<std::io::Error> for DedupeError {
    fn from(err: std::io::Error) -> Self {
        DedupeError::Processing(format!("IO error: {}", err))
    }
}

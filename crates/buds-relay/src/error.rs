//! Error types for relay operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Network failure, timeout, 429 or 5xx. Safe to retry.
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    #[error("not found")]
    NotFound,

    /// Any other 4xx. Retrying will not help.
    #[error("relay rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("too many authors in one lookup: {count} > {max}")]
    TooManyAuthors { count: usize, max: usize },

    #[error("malformed relay data: {0}")]
    Malformed(String),

    #[error("invalid relay configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Unavailable(_))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RelayError::Malformed(err.to_string())
        } else {
            RelayError::Unavailable(err.to_string())
        }
    }
}

/// Map a non-success HTTP status to an error.
pub fn classify_status(status: u16, message: impl Into<String>) -> RelayError {
    match status {
        429 | 500..=599 => RelayError::Unavailable(format!("status {status}")),
        404 => RelayError::NotFound,
        _ => RelayError::Rejected {
            status,
            message: message.into(),
        },
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

//! Error types for sink writes

use thiserror::Error;

/// Result type alias for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The request never produced a response (connect, timeout, I/O)
    #[error("sink request failed: {0}")]
    Request(String),

    /// The store answered with a non-success status
    #[error("sink rejected write with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// A sample cannot be represented in the store's wire format
    #[error("invalid sample: {0}")]
    Encoding(String),

    /// The store reported itself unhealthy
    #[error("sink unhealthy: {0}")]
    Unhealthy(String),

    /// Shutdown was signalled before the write could complete
    #[error("write cancelled")]
    Cancelled,

    /// All attempts failed
    #[error("failed to write to sink after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<SinkError>,
    },
}

impl SinkError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SinkError::Cancelled)
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Request(err.to_string())
    }
}

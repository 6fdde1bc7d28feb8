//! Error types for the directory crate

use thiserror::Error;

/// Result type alias for directory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the directory server and client
#[derive(Debug, Error)]
pub enum Error {
    /// Server startup or serve failure
    #[error("directory server error: {0}")]
    Server(String),

    /// HTTP request failure
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response did not match the expected shape
    #[error("unexpected directory response: {0}")]
    Protocol(String),
}

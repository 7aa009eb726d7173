//! Error types for session operations

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The refresh endpoint answered but refused the refresh token.
    #[error("refresh token rejected: {0}")]
    RefreshRejected(String),

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("credential storage error: {0}")]
    Storage(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

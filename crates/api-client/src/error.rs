//! Error types for authenticated requests

use std::time::Duration;

use transport::{StatusCode, TransportError};

/// Why a token refresh did not produce a new access token.
///
/// `Clone` because one outcome is handed to every caller that joined the
/// same in-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    Unavailable,

    /// The backend refused the refresh; the session has been cleared.
    #[error("token refresh failed: {0}")]
    Failed(String),

    #[error("token refresh timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    /// The session was signed out while the refresh ran.
    #[error("signed out while the token refresh was in flight")]
    SignedOut,

    /// A new session was signed in while the refresh ran; its tokens are
    /// kept and the refresh result discarded.
    #[error("session replaced while the token refresh was in flight")]
    SessionReplaced,
}

impl RefreshError {
    /// Whether the caller must re-authenticate.
    ///
    /// A timeout leaves the stored session in place and a replacement
    /// installs a new one, so neither ends it.
    pub fn is_session_ended(&self) -> bool {
        !matches!(
            self,
            RefreshError::TimedOut(_) | RefreshError::SessionReplaced
        )
    }
}

/// Errors from `AuthenticatedClient`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl Error {
    /// `true` when the session is gone and the user has to sign in again.
    pub fn is_session_ended(&self) -> bool {
        matches!(self, Error::Refresh(e) if e.is_session_ended())
    }

    /// HTTP status of a transport failure, if the server answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Transport(e) => e.status(),
            _ => None,
        }
    }
}

/// Result alias for authenticated client operations.
pub type Result<T> = std::result::Result<T, Error>;

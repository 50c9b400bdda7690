//! Client error types.

use std::time::Duration;

use thiserror::Error;

use crate::session::TerminationReason;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from server.
        message: String,
    },

    /// The session was terminated; the user has to log in again.
    #[error("Session expired ({0}), login required")]
    SessionExpired(TerminationReason),

    /// Token refresh failed. The session has been terminated.
    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// Reading or writing stored tokens failed.
    #[error("Token storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check whether the caller has to send the user back through login.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Error::SessionExpired(_) | Error::Refresh(_) | Error::Api { status: 401, .. }
        )
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { status: 404, .. })
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Api { status, .. } if *status >= 500)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a refresh attempt failed.
///
/// Cloneable so a single outcome can be handed to every request that was
/// waiting on the same refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// No refresh token is stored.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// The refresh endpoint rejected the refresh token.
    #[error("refresh rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Network/HTTP error while talking to the refresh endpoint.
    #[error("network error: {0}")]
    Network(String),

    /// The refresh call did not settle in time.
    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),

    /// The refresh endpoint answered with something unreadable.
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    /// Evicted from a full pending queue before the refresh settled.
    #[error("evicted from the pending refresh queue")]
    QueueOverflow,

    /// Persisting the refreshed tokens failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The refresh task went away without reporting an outcome.
    #[error("refresh task ended without an outcome")]
    Abandoned,

    /// The session was terminated while the refresh was in flight.
    #[error("session ended during refresh")]
    SessionEnded,
}

impl From<reqwest::Error> for RefreshError {
    fn from(e: reqwest::Error) -> Self {
        RefreshError::Network(e.to_string())
    }
}

impl From<StorageError> for RefreshError {
    fn from(e: StorageError) -> Self {
        RefreshError::Storage(e.to_string())
    }
}

/// Token storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem access failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// The token file could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_login() {
        assert!(Error::SessionExpired(TerminationReason::BothTokensExpired).requires_login());
        assert!(Error::Refresh(RefreshError::MissingRefreshToken).requires_login());
        assert!(
            Error::Api {
                status: 401,
                message: "unauthorized".to_string()
            }
            .requires_login()
        );
        assert!(!Error::Config("bad".to_string()).requires_login());
    }

    #[test]
    fn test_status_predicates() {
        let not_found = Error::Api {
            status: 404,
            message: "missing".to_string(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_server_error());

        let unavailable = Error::Api {
            status: 503,
            message: "down".to_string(),
        };
        assert!(unavailable.is_server_error());
    }

    #[test]
    fn test_refresh_error_display() {
        let err = RefreshError::Rejected {
            status: 401,
            message: "jwt expired".to_string(),
        };
        assert_eq!(err.to_string(), "refresh rejected (401): jwt expired");
    }
}

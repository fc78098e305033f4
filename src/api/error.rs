//! Error taxonomy for backend calls

use thiserror::Error;

/// Failure of the transport itself (no HTTP status was received).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Why a credential renewal did not produce a credential.
///
/// Cloned to every caller that was waiting on the same renewal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenewalError {
    /// The backend has no session for us (no or rejected refresh cookie).
    #[error("no active session")]
    NoSession,

    #[error("{0}")]
    Unexpected(String),
}

/// Errors surfaced to callers of authenticated and public endpoints.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No valid credential could be obtained or the renewed one was rejected too.
    #[error("not signed in (run 'eventify login')")]
    Unauthorized,

    #[error("session renewal failed: {0}")]
    RenewalFailed(#[from] RenewalError),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Unauthorized => Some(401),
            _ => None,
        }
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ApiError::Http {
            status: 404,
            message: "Event not found".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 404: Event not found");
        assert_eq!(err.status(), Some(404));

        let err = ApiError::from(RenewalError::NoSession);
        assert_eq!(err.to_string(), "session renewal failed: no active session");

        let err = ApiError::from(TransportError::Timeout);
        assert_eq!(err.to_string(), "network error: request timed out");
        assert_eq!(err.status(), None);
    }
}

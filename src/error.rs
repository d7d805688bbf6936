//! Error types for the gateway.
//!
//! Domain errors raised by the connection manager and the scheduler are
//! carried up to the HTTP layer unchanged and mapped to status codes there
//! via [`WagateError::status_code`].

use axum::http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WagateError>;

#[derive(Debug, Error)]
pub enum WagateError {
    /// No active, ready protocol client.
    #[error("WhatsApp is not connected")]
    NotConnected,

    /// The recipient cannot be addressed on the WhatsApp network.
    #[error("recipient '{0}' is not a valid WhatsApp number")]
    UnknownRecipient(String),

    /// Unparsable or past-dated schedule request.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Unknown or already-fired scheduled message id.
    #[error("scheduled message '{0}' not found")]
    JobNotFound(String),

    /// Dispatch or connection error from the protocol client.
    #[error("transport error: {0}")]
    Transport(String),

    /// Session database error.
    #[error("session store error: {0}")]
    Store(String),

    /// Filesystem error while purging session files. Logged only, never
    /// surfaced to API callers.
    #[error("session cleanup failed: {0}")]
    SessionCleanup(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WagateError {
    /// HTTP status code this error maps to in API responses.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnknownRecipient(_) | Self::JobNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
            Self::Transport(_)
            | Self::Store(_)
            | Self::SessionCleanup(_)
            | Self::Config(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            WagateError::NotConnected.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            WagateError::UnknownRecipient("abc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            WagateError::JobNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            WagateError::InvalidSchedule("past".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WagateError::Transport("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = WagateError::UnknownRecipient("not-a-number".into());
        assert!(err.to_string().contains("not-a-number"));

        let err = WagateError::JobNotFound("1234abcd".into());
        assert!(err.to_string().contains("1234abcd"));
    }
}

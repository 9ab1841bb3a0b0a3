//! Error taxonomy for repository synchronization
//!
//! Remote failures are split into transient errors (retried with backoff) and
//! rejected requests (never retried). Persistence failures are kept separate so
//! a broken write for one repository can be reported without touching others.

use thiserror::Error;

/// Result alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced while polling GitHub and reconciling sync state
#[derive(Debug, Error)]
pub enum SyncError {
    /// Repository id is unknown to the repository directory
    #[error("Repository not found")]
    NotFound { repo_id: i64 },

    /// 5xx, network failure or rate limiting; safe to retry
    #[error("GitHub API request failed: {message}")]
    RemoteTransient {
        status: Option<u16>,
        message: String,
    },

    /// 4xx other than rate limiting; retrying will not help
    #[error("GitHub API rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// Reading or writing the state database failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A full sync is already running
    #[error("A sync operation is already in progress (job {job_id})")]
    SyncInProgress { job_id: String },
}

impl SyncError {
    /// Classify an HTTP error status returned by the GitHub API
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) && status != 429 {
            Self::RemoteRejected { status, message }
        } else {
            Self::RemoteTransient {
                status: Some(status),
                message,
            }
        }
    }

    /// Network-level failure with no HTTP status
    pub fn network(message: impl Into<String>) -> Self {
        Self::RemoteTransient {
            status: None,
            message: message.into(),
        }
    }

    /// HTTP status if the error came from an API response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RemoteTransient { status, .. } => *status,
            Self::RemoteRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the retry policy should try the request again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteRejected { .. } => false,
            Self::RemoteTransient { .. } => true,
            Self::NotFound { .. } | Self::Persistence(_) | Self::SyncInProgress { .. } => false,
        }
    }

    /// Whether the remote reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteRejected { status: 404, .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), err.to_string()),
            None => Self::network(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_rejected() {
        for status in [400, 401, 403, 404, 422] {
            let err = SyncError::from_status(status, "nope");
            assert!(!err.is_retryable(), "status {} should not be retried", status);
            assert_eq!(err.status_code(), Some(status));
        }
    }

    #[test]
    fn test_rate_limit_and_server_errors_are_transient() {
        for status in [429, 500, 502, 503] {
            let err = SyncError::from_status(status, "try later");
            assert!(err.is_retryable(), "status {} should be retried", status);
        }
        assert!(SyncError::network("connection reset").is_retryable());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(SyncError::from_status(404, "Not Found").is_not_found());
        assert!(!SyncError::from_status(401, "Bad credentials").is_not_found());
        assert!(!SyncError::NotFound { repo_id: 1 }.is_not_found());
    }

    #[test]
    fn test_repository_not_found_message() {
        let err = SyncError::NotFound { repo_id: 42 };
        assert_eq!(err.to_string(), "Repository not found");
    }
}

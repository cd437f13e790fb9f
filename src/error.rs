use std::time::Duration;
use thiserror::Error;

/// Failures from talking to the remote sheet.
///
/// Every variant carries a plain message so the error can be cloned and handed
/// to all callers that waited on the same refresh.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SheetError {
    /// Credentials are missing, unreadable or malformed.
    #[error("credential error: {0}")]
    Credential(String),

    /// The remote source is unreachable or rejected authentication.
    #[error("connection error: {0}")]
    Connection(String),

    /// A full read of the sheet failed.
    #[error("remote read failed: {0}")]
    RemoteRead(String),

    /// Appending a row failed.
    #[error("remote write failed: {0}")]
    RemoteWrite(String),

    /// The remote call did not finish within the configured bound.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
}

impl SheetError {
    /// True when the error means the cached session should not be reused.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SheetError::Credential(_) | SheetError::Connection(_))
    }
}

/// Bad values in the process environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be an integer, got {value:?}")]
    InvalidInteger { key: &'static str, value: String },

    #[error("{key} must be true or false, got {value:?}")]
    InvalidBool { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    MustBePositive { key: &'static str },
}

pub type SheetResult<T> = Result<T, SheetError>;

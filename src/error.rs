use thiserror::Error;

/// Error taxonomy shared by every component (local store, remote adapter,
/// token provider, client factory, sync engine). `NotFound` is deliberately
/// absent: a missing document is `Option::None` at the contract boundary,
/// never an error.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("remote io error: {0}")]
    RemoteIo(String),

    #[error("remote auth error (status {status:?}): {message}")]
    RemoteAuth {
        status: Option<u16>,
        message: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for SyncError {
    fn from(err: r2d2::Error) -> Self {
        SyncError::Storage(format!("connection pool: {err}"))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Storage(format!("serialization: {err}"))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            SyncError::RemoteAuth {
                status: Some(status.as_u16()),
                message: err.to_string(),
            }
        } else {
            SyncError::RemoteIo(err.to_string())
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

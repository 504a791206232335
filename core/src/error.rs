use thiserror::Error;

use crate::codec::CodecError;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("local store is not initialized")]
    NotInitialized,

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::StorageFailure(err.to_string())
    }
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        SyncError::StorageFailure(format!("corrupt record: {err}"))
    }
}

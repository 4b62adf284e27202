use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    RemoteWrite,
    Dispatch,
    Serialization,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("unknown gesture '{0}'")]
    InvalidGesture(String),
    #[error("unknown action '{0}'")]
    InvalidAction(String),
    #[error("remote write to {path} failed: {message}")]
    RemoteWriteFailed { path: String, message: String },
    #[error("notification dispatch failed: {0}")]
    DispatchFailed(String),
    #[error("payload serialization failed: {0}")]
    SerializationFailed(String),
    #[error("sync engine is not running")]
    EngineStopped,
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::InvalidGesture(_) | SyncError::InvalidAction(_) => ErrorCode::Validation,
            SyncError::RemoteWriteFailed { .. } => ErrorCode::RemoteWrite,
            SyncError::DispatchFailed(_) => ErrorCode::Dispatch,
            SyncError::SerializationFailed(_) => ErrorCode::Serialization,
            SyncError::EngineStopped => ErrorCode::Unavailable,
        }
    }

    /// Operator input errors leave every piece of engine state untouched.
    pub fn is_input_error(&self) -> bool {
        self.code() == ErrorCode::Validation
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(value: serde_json::Error) -> Self {
        SyncError::SerializationFailed(value.to_string())
    }
}

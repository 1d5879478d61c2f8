//! Error types for the control layer
use std::time::Duration;

use playhost_proto::media::BackendKind;
use playhost_proto::protocol::ErrorKind;
use thiserror::Error;

/// Control layer errors
#[derive(Error, Debug)]
pub enum ControlError {
    /// The active backend does not implement the requested operation
    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        operation: &'static str,
        backend: BackendKind,
    },

    /// Operation needs open media but the backend is closed
    #[error("no media is open")]
    NotOpen,

    /// Native engine or script call failed
    #[error("backend call failed: {0}")]
    Backend(String),

    /// Script or IPC call exceeded its budget
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Media could not be launched
    #[error("launch failed: {0}")]
    Launch(String),

    /// A backend returned a value of the wrong shape
    #[error("unexpected result: {0}")]
    Coercion(String),
}

impl ControlError {
    /// Wire-level classification for client replies.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::Unsupported { .. } => ErrorKind::Unsupported,
            ControlError::Launch(_) => ErrorKind::Launch,
            _ => ErrorKind::Backend,
        }
    }
}

impl From<anyhow::Error> for ControlError {
    fn from(err: anyhow::Error) -> Self {
        ControlError::Backend(format!("{:#}", err))
    }
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;

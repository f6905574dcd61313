//! Backend error types

use thiserror::Error;

/// Errors surfaced by the native audio control backends
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend's control surface could not be opened
    /// (daemon not running, device node missing, no usable mixer control)
    #[error("audio backend unavailable: {0}")]
    Unavailable(String),

    /// The control surface exists but refused access
    #[error("audio backend access denied: {0}")]
    PermissionDenied(String),

    /// The controlled device disappeared, e.g. a USB interface was unplugged
    #[error("audio device gone: {0}")]
    DeviceGone(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

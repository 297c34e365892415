use thiserror::Error;

use crate::events::TrackSource;

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("pre-join session is closed")]
    SessionClosed,
    #[error("choices were already submitted")]
    AlreadySubmitted,
    #[error("{0:?} control is hidden")]
    ControlHidden(TrackSource),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal failures while acquiring a capture device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("device busy: {0}")]
    Busy(String),
    #[error("device did not open within {0} ms")]
    Timeout(u64),
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

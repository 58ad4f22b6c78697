//! Audio device error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio device found")]
    NoDevice,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build stream: {0}")]
    StreamBuildError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    /// Unrecoverable device failure; the session must end
    #[error("Device error: {0}")]
    Device(String),

    #[error("Backend error: {0}")]
    BackendError(String),
}

impl AudioError {
    /// Fatal errors end the current playback/record session
    pub fn is_fatal(&self) -> bool {
        matches!(self, AudioError::Device(_) | AudioError::NoDevice)
    }
}

pub type AudioResult<T> = Result<T, AudioError>;

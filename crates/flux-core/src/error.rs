//! Error types shared by Flux crates

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum FluxError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type FluxResult<T> = Result<T, FluxError>;

//! File I/O error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unsupported WAV content
    #[error("Format error: {0}")]
    Format(String),

    #[error("Writer already finalized")]
    WriterClosed,
}

pub type FileResult<T> = Result<T, FileError>;

impl From<hound::Error> for FileError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => FileError::Io(e),
            other => FileError::Format(other.to_string()),
        }
    }
}

impl FileError {
    /// True for `Format` errors
    pub fn is_format(&self) -> bool {
        matches!(self, FileError::Format(_))
    }
}

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Seek out of range: position {pos} exceeds logical length {max}")]
    SeekOutOfRange { pos: u64, max: u64 },

    #[error("Recovery failed: {0}")]
    RecoveryFailure(String),

    #[error("Corrupt journal: {0}")]
    CorruptJournal(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Handle is closed")]
    Closed,
}

pub type TxResult<T> = Result<T, TxError>;

impl From<TxError> for io::Error {
    fn from(err: TxError) -> Self {
        match err {
            TxError::IoError(inner) => inner,
            TxError::SeekOutOfRange { .. } | TxError::InvalidInput(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err.to_string())
            }
            TxError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, err.to_string()),
            TxError::NotSupported(_) => io::Error::new(io::ErrorKind::Unsupported, err.to_string()),
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

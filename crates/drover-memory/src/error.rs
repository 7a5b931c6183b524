use thiserror::Error;

use drover_core::ErrorKind;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<MemoryError> for drover_core::Error {
    fn from(err: MemoryError) -> Self {
        let kind = match &err {
            MemoryError::InvalidInput(_) => ErrorKind::InvalidConfig,
            _ => ErrorKind::Unknown,
        };
        drover_core::Error::new(kind, err.to_string())
    }
}

//! Catalog store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid snapshot: {0}")]
    Invalid(String),

    #[error("catalog lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for buildfarm_core::Error {
    fn from(err: StoreError) -> Self {
        buildfarm_core::Error::Storage(err.to_string())
    }
}

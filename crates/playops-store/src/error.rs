use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for playops_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => playops_core::Error::NotFound(msg),
            other => playops_core::Error::Store(other.to_string()),
        }
    }
}

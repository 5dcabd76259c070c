use thiserror::Error;
use tonic::Status;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid document path: {0}")]
    InvalidPath(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(path: &str) -> Self {
        Self::NotFound(format!("document {} not found", path))
    }
}

impl From<StoreError> for Status {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => Status::not_found(msg),
            StoreError::InvalidPath(msg) => Status::invalid_argument(msg),
            other => Status::internal(other.to_string()),
        }
    }
}

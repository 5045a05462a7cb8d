use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for tonic::Status {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => tonic::Status::not_found(err.to_string()),
            StoreError::InvalidKey(_) => tonic::Status::invalid_argument(err.to_string()),
            StoreError::Io(_) => tonic::Status::internal(err.to_string()),
        }
    }
}

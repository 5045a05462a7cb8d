use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("invalid or missing parameter: {0}")]
    InvalidParameter(String),

    #[error("store error: {0}")]
    Store(#[from] procri_store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ImageError> for tonic::Status {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::InvalidParameter(_) => tonic::Status::invalid_argument(err.to_string()),
            ImageError::Store(e) => e.into(),
            ImageError::Serialization(_) => tonic::Status::internal(err.to_string()),
        }
    }
}

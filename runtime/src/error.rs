use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("invalid or missing parameter: {0}")]
    InvalidParameter(String),

    #[error("sandbox not ready: {0}")]
    SandboxNotReady(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("symlink for container failed: {0}")]
    Symlink(String),

    #[error("process spawn failed: {0}")]
    Spawn(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unsupported operation or parameter: {0}")]
    Unsupported(String),

    #[error("store error: {0}")]
    Store(#[from] procri_store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RuntimeError> for tonic::Status {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::InvalidParameter(_) => tonic::Status::invalid_argument(err.to_string()),
            RuntimeError::SandboxNotReady(_) => tonic::Status::failed_precondition(err.to_string()),
            RuntimeError::NotFound(_) => tonic::Status::not_found(err.to_string()),
            RuntimeError::Timeout(_) => tonic::Status::deadline_exceeded(err.to_string()),
            RuntimeError::Unsupported(_) => tonic::Status::unimplemented(err.to_string()),
            RuntimeError::Symlink(_)
            | RuntimeError::Spawn(_)
            | RuntimeError::Store(_)
            | RuntimeError::Io(_)
            | RuntimeError::Serialization(_)
            | RuntimeError::Internal(_) => tonic::Status::internal(err.to_string()),
        }
    }
}

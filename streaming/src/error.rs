use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamingError {
    #[error("invalid streaming request: {0}")]
    InvalidRequest(String),

    #[error("attach is not supported")]
    AttachUnsupported,

    #[error("process spawn failed: {0}")]
    Spawn(String),

    #[error("command exited with status {0}")]
    CommandFailed(i32),

    #[error("dialing port {0}: {1}")]
    Dial(i32, std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

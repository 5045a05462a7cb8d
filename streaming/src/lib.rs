mod bridge;
mod error;
mod host;

pub use bridge::{StreamRequest, StreamingBridge};
pub use error::StreamingError;
pub use host::{HostStreamer, StreamIn, StreamOut, TerminalSize};

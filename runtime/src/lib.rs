mod container;
mod env;
mod error;
mod execsync;
mod logpipe;
mod paths;
pub mod pty;
mod sandbox;
mod service;
mod stats;
mod streaming;
mod supervisor;
#[cfg(test)]
mod testutil;
mod types;

pub use error::RuntimeError;
pub use execsync::ExecSyncResult;
pub use service::{RuntimeService, host_ip_address};
pub use streaming::StreamingServer;
pub use types::{Container, ContainerState, Sandbox, SandboxState};

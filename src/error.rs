use std::io;

use thiserror::Error;

/// Errors surfaced by the capture pipeline
///
/// Everything here is fatal for the running session. Transient conditions such as running out of
/// free requests are logged and absorbed instead of being reported through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Stream setup is inconsistent (mismatched buffer counts, unsupported pixel format, ..)
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The device could not provide or map buffers
    #[error("allocation error: {0}")]
    Allocation(String),
    /// The device refused a request, which implies it has been stopped
    #[error("submit error: {0}")]
    Submit(String),
    /// A collaborator signalled more completions than it was handed
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Any other device stack failure (start, stop, ..)
    #[error("device error: {0}")]
    Device(String),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

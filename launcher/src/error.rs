use std::io;

use thiserror::Error;

use crate::profile::LaunchProfileError;

#[derive(Debug, Error)]
pub(crate) enum LaunchError {
    #[error(transparent)]
    Profile(#[from] LaunchProfileError),
    #[error("could not listen on {address}: {source}")]
    Listen { address: String, source: io::Error },
    #[error("could not launch {executable}: {source}")]
    Spawn { executable: String, source: io::Error },
    #[error("the spy never connected: {0}")]
    Accept(io::Error),
    #[error("could not send the connection header: {0}")]
    Handshake(io::Error),
    #[error("could not create trace file {path}: {source}")]
    Output { path: String, source: io::Error },
    #[error("trace transfer failed: {0}")]
    Transfer(io::Error),
}

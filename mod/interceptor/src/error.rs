use std::io;

use spyglass::logging::LoggingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("could not load {library}: {reason}")]
    Open { library: String, reason: String },
    #[error("{symbol} not found in {library}")]
    Missing { symbol: &'static str, library: String },
    #[error("could not detour {symbol}: {source}")]
    Hook { symbol: &'static str, source: retour::Error },
    #[error("could not connect to the capture tool at {address}: {source}")]
    Connect { address: String, source: io::Error },
    #[error(transparent)]
    Logging(#[from] LoggingError),
}

use thiserror::Error;

use crate::LineSourceError;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Opening the input failed.
    #[error("failed to open {0}: {1}")]
    Open(String, #[source] std::io::Error),

    /// Reading from the input failed.
    #[error("failed to read line: {0}")]
    Read(#[from] std::io::Error),
}

impl LineSourceError for Error {}

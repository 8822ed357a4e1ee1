use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The pipeline has already been started.
    #[error("the pipeline has already been started")]
    AlreadyStarted,

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Registering or encoding metrics failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

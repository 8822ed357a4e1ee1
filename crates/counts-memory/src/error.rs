use logcount_counts::CountStoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
#[error("Count store error")]
pub struct Error;

impl CountStoreError for Error {}

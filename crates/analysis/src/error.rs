use std::num::ParseIntError;

use thiserror::Error;

/// Errors that can occur while parsing a raw access-log line.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The status code could not be converted to an integer.
    #[error("failed to parse status code: {0}")]
    StatusCode(#[from] ParseIntError),

    /// The bracketed timestamp has the right layout but is not a valid time.
    #[error("failed to parse time: {0}")]
    Timestamp(#[from] chrono::ParseError),

    /// The bracketed timestamp did not match `DD/Mon/YYYY:HH:MM:SS ±ZZZZ`.
    #[error("timestamp does not match DD/Mon/YYYY:HH:MM:SS ±ZZZZ: {0}")]
    TimestampLayout(String),

    /// The line matched neither the tagged nor the untagged shape.
    #[error("failed to parse log line: {0}")]
    Unrecognized(String),
}

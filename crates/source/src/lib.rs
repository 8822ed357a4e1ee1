//! Sources of raw access-log lines.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::error::Error as StdError;
use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::mpsc;

/// Marker trait for `LineSource` errors
pub trait LineSourceError: Debug + StdError + Send + Sync + 'static {}

/// A producer of raw log lines, consumed one line at a time.
///
/// Delivery is at-most-once: the consumer never hands a line back.
#[async_trait]
pub trait LineSource: Send + 'static {
    /// The error type for the source.
    type Error: LineSourceError;

    /// Waits for the next line. `Ok(None)` signals end of stream.
    async fn next_line(&mut self) -> Result<Option<String>, Self::Error>;
}

/// Reads newline-delimited lines from any buffered async reader.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD, so a damaged
/// line reaches the parser instead of ending the stream.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> ReaderSource<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

impl ReaderSource<BufReader<Stdin>> {
    /// Reads lines from standard input.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl ReaderSource<BufReader<File>> {
    /// Reads lines from the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .map_err(|e| Error::Open(path.display().to_string(), e))?;

        Ok(Self::new(BufReader::new(file)))
    }
}

#[async_trait]
impl<R> LineSource for ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    type Error = Error;

    async fn next_line(&mut self) -> Result<Option<String>, Self::Error> {
        self.buf.clear();

        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }

        let mut line = self.buf.as_slice();
        if let Some(rest) = line.strip_suffix(b"\n") {
            line = rest;
        }
        if let Some(rest) = line.strip_suffix(b"\r") {
            line = rest;
        }

        Ok(Some(String::from_utf8_lossy(line).into_owned()))
    }
}

/// Receives lines pushed through an in-process channel.
///
/// The stream ends once every sender has been dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelSource {
    /// Creates a source and the sender that feeds it.
    #[must_use]
    pub fn new(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl LineSource for ChannelSource {
    type Error = Error;

    async fn next_line(&mut self) -> Result<Option<String>, Self::Error> {
        Ok(self.rx.recv().await)
    }
}

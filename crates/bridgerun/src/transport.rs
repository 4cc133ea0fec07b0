//! # Transport Abstraction
//!
//! A minimal, async interface for moving protocol lines between the script and
//! the host.
//!
//! ## Philosophy
//!
//! - **Line-Oriented**: The Transport moves whole lines. It knows nothing about
//!   call ids, executors, or JSON.
//! - **Split Directions**: Sending and receiving are independent. The link runs
//!   one writer and one reader against the same transport concurrently.

use std::fmt;

use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::Stdin;
use tokio::io::Stdout;
use tokio::sync::Mutex;

/// Errors that occur at the stream layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer went away or the stream was closed.
    ConnectionLost(String),
    /// Generic I/O failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => {
                Self::ConnectionLost(e.to_string())
            }
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional line stream to the host.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writes one complete line. `line` already ends in `\n`.
    async fn send_line(&self, line: &str) -> Result<()>;

    /// Reads the next line without its terminator.
    ///
    /// Returns `Ok(None)` once the host has closed its end.
    async fn recv_line(&self) -> Result<Option<String>>;
}

/// A transport over any buffered reader and writer pair.
pub struct LineTransport<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

impl LineTransport<BufReader<Stdin>, Stdout> {
    /// The process's own stdin and stdout, which the host holds the other end of.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

#[async_trait::async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv_line(&self) -> Result<Option<String>> {
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

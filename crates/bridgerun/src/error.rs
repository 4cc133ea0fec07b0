//! # Error Definitions
//!
//! Everything a script can observe going wrong while talking to the host.

use std::time::Duration;

use bridgerpc::HostError;
use bridgerpc::RpcError;

use crate::config;
use crate::transport;

#[derive(Debug, Clone)]
pub enum Error {
    /// Encoding a call or decoding a reply failed.
    Rpc(RpcError),
    /// The host raised an exception while running the call.
    Host(HostError),
    /// The byte stream to the host failed.
    Transport(transport::Error),
    /// Loading the link configuration failed.
    Config(config::Error),
    /// A wait expired before the host replied.
    Timeout { function: String, after: Duration },
    /// A non-blocking read found nothing queued.
    Empty,
    /// The link has shut down; no further replies will arrive.
    LinkClosed,
    /// The future was cancelled before a reply arrived.
    Cancelled,
    /// The host closed the call without ever returning a value.
    NoResult { function: String },
    /// `wait` was called again on a future that already produced its outcome.
    AlreadyResolved,
    /// A blocking wait was attempted on a thread driving an async runtime.
    InsideRuntime,
    /// A task batch was malformed (empty, or a reference to a task not earlier in the batch).
    InvalidBatch(String),
    /// An event payload did not match its registered kind.
    MalformedEvent { kind: String, details: String },
    /// An event was tagged with a kind this runtime does not know.
    UnknownEventKind(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rpc(e) => write!(f, "Protocol error: {}", e),
            Self::Host(e) => write!(f, "Host exception: {}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::Timeout { function, after } => {
                write!(f, "Call to '{}' timed out after {:?}", function, after)
            }
            Self::Empty => write!(f, "Queue is empty"),
            Self::LinkClosed => write!(f, "Link to host is closed"),
            Self::Cancelled => write!(f, "Call was cancelled"),
            Self::NoResult { function } => write!(f, "Call to '{}' closed without a result", function),
            Self::AlreadyResolved => write!(f, "Future already produced its result"),
            Self::InsideRuntime => write!(f, "Cannot block on the host from inside an async runtime"),
            Self::InvalidBatch(msg) => write!(f, "Invalid task batch: {}", msg),
            Self::MalformedEvent { kind, details } => {
                write!(f, "Malformed '{}' event: {}", kind, details)
            }
            Self::UnknownEventKind(kind) => write!(f, "Unknown event kind: {:?}", kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e) => Some(e),
            Self::Host(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        Self::Host(e)
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<config::Error> for Error {
    fn from(e: config::Error) -> Self {
        Self::Config(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

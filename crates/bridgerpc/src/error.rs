//! # Error Definitions
//!
//! Failures of the wire codec itself, and the host-reported failure record
//! carried back inside `except` replies.

use std::fmt;

/// Operational failures while encoding or decoding a line.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcError {
    /// The line was not valid JSON, or JSON of the wrong shape.
    Json(String),
    /// A reply object was missing a required field.
    MissingField(&'static str),
    /// A field was present but held the wrong kind of value.
    InvalidField { field: &'static str, details: String },
    /// A call line did not follow `<marker><id> <executor> <function> <args>`.
    MalformedCall(String),
    /// Function names are single tokens on the wire.
    InvalidFunctionName(String),
    /// Executor tags are single tokens on the wire.
    InvalidExecutor(String),
    /// A value could not be converted into the requested Rust type.
    TypeMismatch { expected: &'static str, found: String },
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(msg) => write!(f, "malformed json: {}", msg),
            Self::MissingField(field) => write!(f, "missing field '{}'", field),
            Self::InvalidField { field, details } => write!(f, "invalid field '{}': {}", field, details),
            Self::MalformedCall(line) => write!(f, "malformed call line: {}", line),
            Self::InvalidFunctionName(name) => write!(f, "invalid function name: {:?}", name),
            Self::InvalidExecutor(tag) => write!(f, "invalid executor tag: {:?}", tag),
            Self::TypeMismatch { expected, found } => write!(f, "type mismatch: expected {}, found {}", expected, found),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// One frame of the host-side call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub file: String,
    pub method: String,
    pub line: i64,
}

/// A failure raised inside the host while executing a call.
///
/// These are distinct from `RpcError`: they represent the *host* failing,
/// whereas `RpcError` represents the *wire* failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub kind: String,
    pub message: String,
    pub description: String,
    pub stack: Vec<StackFrame>,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if !self.description.is_empty() && self.description != self.message {
            write!(f, "\n  {}", self.description)?;
        }
        for frame in &self.stack {
            write!(f, "\n    at {} ({}:{})", frame.method, frame.file, frame.line)?;
        }
        Ok(())
    }
}

impl std::error::Error for HostError {}

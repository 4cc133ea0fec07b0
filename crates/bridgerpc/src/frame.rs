//! # Wire Frames
//!
//! Both directions of the protocol are one record per line.
//!
//! ```text
//! script -> host:  ?mc<id> <executor> <function> <json args array>
//! host -> script:  {"fcid": <id>, "retval": ..., "except": {...}, "conn": "close"}
//! ```
//!
//! ## Invariants
//!
//! - `encode_call` always returns exactly one line, terminated by `\n`.
//! - Function names and executor tags are single whitespace-free tokens.
//! - Floats are finite. JSON has no NaN or infinity, so they are refused rather
//!   than written as `null`.
//! - A reply may carry a value, an exception, a close marker, or any combination.

use serde::Deserialize;
use serde_json::Map;
use serde_json::json;

use crate::error::HostError;
use crate::error::Result;
use crate::error::RpcError;
use crate::error::StackFrame;
use crate::value::Value;

/// Prefix that marks a line on the host's input as a bridge call.
pub const CALL_MARKER: &str = "?mc";

/// Call id reserved for lifecycle messages and fire-and-forget calls.
pub const SYSTEM_CALL_ID: u64 = 0;

/// Pseudo-function asking the host to abandon an in-flight call.
pub const CANCEL_FUNCTION: &str = "cancelfn!";

/// Pseudo-function asking the host to release the script. Also the value of the
/// acknowledgment the host sends back on call id 0.
pub const EXIT_FUNCTION: &str = "exit!";

// ============================================================================
//  CALLS
// ============================================================================

/// Encodes a call request as a single protocol line.
pub fn encode_call(id: u64, executor: &str, function: &str, args: &[Value]) -> Result<String> {
    check_token(function, RpcError::InvalidFunctionName)?;
    check_token(executor, RpcError::InvalidExecutor)?;
    for arg in args {
        check_finite("args", arg)?;
    }
    let args = serde_json::to_string(args)?;
    Ok(format!("{CALL_MARKER}{id} {executor} {function} {args}\n"))
}

fn check_token(token: &str, invalid: fn(String) -> RpcError) -> Result<()> {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(invalid(token.to_string()));
    }
    Ok(())
}

fn check_finite(field: &'static str, value: &Value) -> Result<()> {
    match value {
        Value::Float(x) if !x.is_finite() => Err(RpcError::InvalidField {
            field,
            details: format!("{} has no JSON representation", x),
        }),
        Value::List(items) => items.iter().try_for_each(|v| check_finite(field, v)),
        Value::Map(entries) => entries.values().try_for_each(|v| check_finite(field, v)),
        _ => Ok(()),
    }
}

/// A call request as seen by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct CallLine {
    pub id: u64,
    pub executor: String,
    pub function: String,
    pub args: Vec<Value>,
}

impl CallLine {
    pub fn is_fire_and_forget(&self) -> bool {
        self.id == SYSTEM_CALL_ID
    }
}

/// Decodes a call request line. This is the host's half of the protocol, used by
/// mock hosts and diagnostics.
pub fn decode_call(line: &str) -> Result<CallLine> {
    let malformed = || RpcError::MalformedCall(line.trim_end().to_string());

    let body = line.trim_end_matches(['\r', '\n']);
    let body = body.strip_prefix(CALL_MARKER).ok_or_else(malformed)?;

    let mut parts = body.splitn(4, ' ');
    let id = parts.next().and_then(|s| s.parse::<u64>().ok()).ok_or_else(malformed)?;
    let executor = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
    let function = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
    let args = parts.next().ok_or_else(malformed)?;
    let args: Vec<Value> = serde_json::from_str(args)?;

    Ok(CallLine {
        id,
        executor: executor.to_string(),
        function: function.to_string(),
        args,
    })
}

// ============================================================================
//  REPLIES
// ============================================================================

/// A decoded reply line.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub call_id: u64,
    pub value: Option<Value>,
    pub error: Option<HostError>,
    /// No further replies will arrive for `call_id`.
    pub closed: bool,
}

impl Reply {
    pub fn value(call_id: u64, value: impl Into<Value>) -> Self {
        Self { call_id, value: Some(value.into()), error: None, closed: false }
    }

    pub fn error(call_id: u64, error: HostError) -> Self {
        Self { call_id, value: None, error: Some(error), closed: false }
    }

    pub fn close(call_id: u64) -> Self {
        Self { call_id, value: None, error: None, closed: true }
    }

    /// Marks this reply as the last one for its call.
    pub fn closing(mut self) -> Self {
        self.closed = true;
        self
    }

    /// True for the host's acknowledgment of an `exit!` request.
    pub fn is_exit_ack(&self) -> bool {
        self.call_id == SYSTEM_CALL_ID
            && self.value.as_ref().and_then(Value::as_str) == Some(EXIT_FUNCTION)
    }
}

#[derive(Deserialize)]
struct RawException {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    stack: Vec<RawFrame>,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    file: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    line: i64,
}

impl From<RawException> for HostError {
    fn from(raw: RawException) -> Self {
        HostError {
            kind: raw.kind,
            message: raw.message,
            description: raw.desc,
            stack: raw
                .stack
                .into_iter()
                .map(|f| StackFrame { file: f.file, method: f.method, line: f.line })
                .collect(),
        }
    }
}

/// Decodes a reply line.
///
/// A `retval` of JSON `null` is a real value (`Some(Value::Null)`), distinct from
/// an absent `retval`.
pub fn decode_reply(line: &str) -> Result<Reply> {
    let json: serde_json::Value = serde_json::from_str(line.trim())?;
    let serde_json::Value::Object(mut obj) = json else {
        return Err(RpcError::Json(format!("expected object, got {}", line.trim())));
    };

    let call_id = match obj.remove("fcid") {
        Some(id) => id.as_u64().ok_or_else(|| RpcError::InvalidField {
            field: "fcid",
            details: format!("expected unsigned integer, got {}", id),
        })?,
        None => return Err(RpcError::MissingField("fcid")),
    };

    let value = match obj.remove("retval") {
        Some(v) => Some(serde_json::from_value::<Value>(v)?),
        None => None,
    };

    let error = match obj.remove("except") {
        Some(e) => Some(HostError::from(serde_json::from_value::<RawException>(e)?)),
        None => None,
    };

    let closed = match obj.remove("conn") {
        None => false,
        Some(serde_json::Value::String(s)) if s == "close" => true,
        Some(other) => {
            return Err(RpcError::InvalidField {
                field: "conn",
                details: format!("expected \"close\", got {}", other),
            });
        }
    };

    Ok(Reply { call_id, value, error, closed })
}

/// Encodes a reply as the host would emit it.
pub fn encode_reply(reply: &Reply) -> Result<String> {
    let mut obj = Map::new();
    obj.insert("fcid".into(), json!(reply.call_id));
    if let Some(value) = &reply.value {
        check_finite("retval", value)?;
        obj.insert("retval".into(), serde_json::to_value(value)?);
    }
    if let Some(e) = &reply.error {
        let stack: Vec<_> = e
            .stack
            .iter()
            .map(|f| json!({ "file": f.file, "method": f.method, "line": f.line }))
            .collect();
        obj.insert(
            "except".into(),
            json!({ "type": e.kind, "message": e.message, "desc": e.description, "stack": stack }),
        );
    }
    if reply.closed {
        obj.insert("conn".into(), json!("close"));
    }
    let mut line = serde_json::to_string(&serde_json::Value::Object(obj))?;
    line.push('\n');
    Ok(line)
}

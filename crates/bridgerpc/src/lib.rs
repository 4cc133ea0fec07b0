//! # bridgerpc
//!
//! The wire format spoken between a script and the host application it drives.
//!
//! ## Philosophy
//!
//! - **Line-Oriented**: every call and every reply is exactly one line of text.
//! - **Decode Once**: replies become typed `Reply` and `Value` records here, so the
//!   runtime never looks at raw JSON.
//! - **Tolerant Reader**: a bad line is an error value, never a panic, so the
//!   caller can report it and move on to the next line.

pub mod batch;
pub mod error;
pub mod frame;
pub mod value;

pub use batch::TaskArg;
pub use batch::TaskFrame;
pub use batch::decode_batch;
pub use batch::encode_batch;
pub use error::HostError;
pub use error::Result;
pub use error::RpcError;
pub use error::StackFrame;
pub use frame::CallLine;
pub use frame::Reply;
pub use frame::decode_call;
pub use frame::decode_reply;
pub use frame::encode_call;
pub use frame::encode_reply;
pub use value::Value;
pub use value::from_value;
pub use value::to_value;

#[cfg(test)]
mod tests;

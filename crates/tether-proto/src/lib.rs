//! Wire protocol for tether: JSON-RPC 2.0 messages framed one per line.
//!
//! A frame is one message serialized as compact JSON followed by a newline.
//! Compact serialization never emits a raw newline (it is escaped inside
//! strings), so the framing is self-delimiting in both directions.

pub mod codec;
pub mod message;

pub use codec::{MalformedMessage, decode, encode};
pub use message::{Message, Notification, Request, Response, RpcError};

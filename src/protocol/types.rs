//! Framed Binary Message Types
//!
//! This module defines the message type used on the wire and its
//! serialization. Every frame starts with a fixed five-byte header:
//!
//! ```text
//! ┌────────┬──────────────────────┬─────────────────────────────┐
//! │ type   │ len_or_count         │ payload                     │
//! │ u8     │ u32 little-endian    │ len bytes / count elements  │
//! └────────┴──────────────────────┴─────────────────────────────┘
//! ```
//!
//! - Strings (`0x01` simple, `0x02` error, `0x04` bulk): `len` is the
//!   payload byte length; the bytes follow verbatim and are binary safe.
//! - Integer (`0x03`): `len` is always 8; the payload is an i64 in
//!   little-endian byte order.
//! - Array (`0x05`): `len` is the element count; `count` frames follow,
//!   each self-delimiting, nested arrays included.
//! - Null (`0x06`): `len` is 0 and there is no payload.
//!
//! Commands travel as an Array of BulkStrings; the server answers with a
//! single top-level message per request. Pipelining is plain
//! concatenation of frames.

use bytes::Bytes;
use std::fmt;

/// Size of the fixed frame header (type byte + u32 length).
pub const HEADER_SIZE: usize = 5;

/// Wire type codes, one per [`Message`] variant.
pub mod code {
    pub const SIMPLE_STRING: u8 = 0x01;
    pub const ERROR: u8 = 0x02;
    pub const INTEGER: u8 = 0x03;
    pub const BULK_STRING: u8 = 0x04;
    pub const ARRAY: u8 = 0x05;
    pub const NULL: u8 = 0x06;
}

/// A single protocol message.
///
/// This is the unit both sides of the connection exchange: requests are
/// `Array`s of `BulkString`s, responses are whatever shape the command
/// produces. All string payloads are opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Short non-binary status reply, e.g. `OK` or `PONG`.
    SimpleString(Bytes),

    /// Error reply; the payload is the human-readable message.
    Error(Bytes),

    /// 64-bit signed integer reply.
    Integer(i64),

    /// Binary-safe string payload.
    BulkString(Bytes),

    /// Sequence of messages. Owns its elements.
    Array(Vec<Message>),

    /// Absence of a value (missing key, missing rank).
    Null,
}

impl Message {
    /// Creates a simple-string message.
    pub fn simple(s: impl Into<Bytes>) -> Self {
        Message::SimpleString(s.into())
    }

    /// Creates an error message.
    pub fn error(s: impl Into<Bytes>) -> Self {
        Message::Error(s.into())
    }

    /// Creates an integer message.
    pub fn integer(n: i64) -> Self {
        Message::Integer(n)
    }

    /// Creates a bulk-string message.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Message::BulkString(data.into())
    }

    /// Creates an array message.
    pub fn array(values: Vec<Message>) -> Self {
        Message::Array(values)
    }

    /// The `OK` status reply.
    pub fn ok() -> Self {
        Message::SimpleString(Bytes::from_static(b"OK"))
    }

    /// The `PONG` status reply.
    pub fn pong() -> Self {
        Message::SimpleString(Bytes::from_static(b"PONG"))
    }

    /// Returns the wire type code for this message.
    pub fn type_code(&self) -> u8 {
        match self {
            Message::SimpleString(_) => code::SIMPLE_STRING,
            Message::Error(_) => code::ERROR,
            Message::Integer(_) => code::INTEGER,
            Message::BulkString(_) => code::BULK_STRING,
            Message::Array(_) => code::ARRAY,
            Message::Null => code::NULL,
        }
    }

    /// Serializes the message to a fresh byte vector.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the message into an existing buffer.
    ///
    /// Used by the connection layer to batch pipelined responses into a
    /// single write buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.type_code());
        match self {
            Message::SimpleString(data) | Message::Error(data) | Message::BulkString(data) => {
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(data);
            }
            Message::Integer(n) => {
                buf.extend_from_slice(&8u32.to_le_bytes());
                buf.extend_from_slice(&n.to_le_bytes());
            }
            Message::Array(values) => {
                buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
            Message::Null => {
                buf.extend_from_slice(&0u32.to_le_bytes());
            }
        }
    }

    /// Exact size of the serialized frame in bytes.
    ///
    /// Agrees with `serialize().len()` for every message; the connection
    /// layer relies on this for buffer sizing.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE
            + match self {
                Message::SimpleString(data) | Message::Error(data) | Message::BulkString(data) => {
                    data.len()
                }
                Message::Integer(_) => 8,
                Message::Array(values) => values.iter().map(Message::serialized_size).sum(),
                Message::Null => 0,
            }
    }

    /// Returns true if this message is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Message::Null)
    }

    /// Returns true if this message is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error(_))
    }

    /// The inner bytes of a string-carrying variant.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Message::SimpleString(b) | Message::Error(b) | Message::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// The inner integer, if this is an `Integer`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Message::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// The inner elements, if this is an `Array`.
    pub fn as_array(&self) -> Option<&[Message]> {
        match self {
            Message::Array(values) => Some(values),
            _ => None,
        }
    }
}

/// Builds a command message: an Array of BulkStrings, one per argument.
pub fn make_command<I, B>(args: I) -> Message
where
    I: IntoIterator<Item = B>,
    B: Into<Bytes>,
{
    Message::Array(args.into_iter().map(|a| Message::BulkString(a.into())).collect())
}

/// Extracts the argument vector from a command message.
///
/// Returns `Some` iff the message is an Array whose elements are all
/// BulkStrings; anything else is not a well-formed command.
pub fn parse_command(msg: &Message) -> Option<Vec<Bytes>> {
    let elements = msg.as_array()?;
    let mut args = Vec::with_capacity(elements.len());
    for element in elements {
        match element {
            Message::BulkString(data) => args.push(data.clone()),
            _ => return None,
        }
    }
    Some(args)
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::SimpleString(data) => write!(f, "{}", String::from_utf8_lossy(data)),
            Message::Error(data) => write!(f, "(error) {}", String::from_utf8_lossy(data)),
            Message::Integer(n) => write!(f, "(integer) {}", n),
            Message::BulkString(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            Message::Null => write!(f, "(nil)"),
            Message::Array(values) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

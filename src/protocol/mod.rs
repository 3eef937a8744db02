//! Framed Binary Protocol
//!
//! This module implements the wire protocol spoken between clients and
//! the server: a compact length-prefixed binary framing rather than a
//! text protocol, so payloads need no escaping and the parser never
//! scans for terminators.
//!
//! ## Modules
//!
//! - `types`: the [`Message`] enum, serializer, and command helpers
//! - `parser`: the streaming [`FrameParser`] with error poisoning
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{make_command, FrameParser};
//!
//! let request = make_command(["PING"]);
//! let wire_bytes = request.serialize();
//!
//! let mut parser = FrameParser::new();
//! parser.feed(&wire_bytes);
//! assert_eq!(parser.try_parse().unwrap(), Some(request));
//! ```

pub mod parser;
pub mod types;

pub use parser::{FrameParser, ParseError, ParseResult, MAX_MESSAGE_SIZE};
pub use types::{make_command, parse_command, Message};
